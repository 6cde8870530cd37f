use crate::browser_ai::PageDriver;
use crate::error::Result;
use crate::models::Candidate;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

pub const SANITIZED_TEXT_LIMIT: usize = 80;

/// Collects lesson-like elements of one frame. `__LIMIT__` is replaced with
/// the per-frame cap before evaluation.
const COLLECT_CANDIDATES_TEMPLATE: &str = r#"((limit) => {
    const normalize = (value) => (value || '').replace(/\s+/g, ' ').trim();
    const items = [];
    const seenKeys = new Set();
    const seenNodes = new Set();
    let order = 0;

    const isVisible = (el) => {
        if (!el || !el.getBoundingClientRect) return false;
        const rect = el.getBoundingClientRect();
        return rect.width > 0 && rect.height > 0;
    };
    const isIgnoredContainer = (el) => !!el.closest('header,footer,nav');
    const toContext = (el) => {
        const ctx = el.closest('[class*="resource"],[class*="course"],[class*="catalog"],[class*="list"],[id*="resource"],[id*="course"],[id*="catalog"]');
        return normalize(ctx ? ctx.textContent : el.textContent).slice(0, 160);
    };
    const toResourceId = (href) => {
        const match = (href || '').match(/[?&]resourceId=([^&]+)/);
        if (!match) return '';
        try { return decodeURIComponent(match[1]); } catch (e) { return match[1]; }
    };

    const add = (el, reason) => {
        if (!el || items.length >= limit) return;
        if (isIgnoredContainer(el)) return;
        const text = normalize(el.textContent || el.getAttribute('title') || el.getAttribute('aria-label'));
        const rawHref = el.getAttribute('href') || '';
        const href = (typeof el.href === 'string' && el.href) || rawHref;
        const dataKey = el.getAttribute('data-resource-id')
            || el.getAttribute('data-resourceid')
            || el.getAttribute('data-resid')
            || el.getAttribute('data-resource')
            || '';
        if (!text && !href && !dataKey) return;
        const resourceId = dataKey || toResourceId(href);
        const key = resourceId || href || dataKey;
        if (key) {
            if (seenKeys.has(key)) return;
            seenKeys.add(key);
        } else {
            if (seenNodes.has(el)) return;
            seenNodes.add(el);
        }
        items.push({
            domIndex: order++,
            text,
            href,
            resourceId,
            dataKey,
            tag: el.tagName || '',
            id: el.id || '',
            className: typeof el.className === 'string'
                ? el.className.split(/\s+/).filter(Boolean).slice(0, 6).join(' ')
                : '',
            context: toContext(el),
            reason
        });
    };

    ['a[href*="resourceId="]', '[data-resource-id]', '[data-resourceid]', '[data-resid]', '[data-resource]']
        .forEach((selector) => {
            document.querySelectorAll(selector).forEach((el) => add(el, selector));
        });

    const keywords = ['课程目录', '课程大纲', '目录', '章节', '课时', '课程'];
    const headings = Array.from(document.querySelectorAll('h1,h2,h3,h4,h5,div,span,p'))
        .filter((el) => {
            const text = normalize(el.textContent);
            return text && keywords.some((word) => text.includes(word));
        })
        .slice(0, 6);

    const containers = new Set();
    headings.forEach((node) => {
        const container = node.closest('[class*="catalog"],[class*="outline"],[class*="resource"],[class*="list"],section,div');
        if (container) containers.add(container);
    });
    document.querySelectorAll('[class*="catalog"],[class*="outline"],[class*="resource"],[class*="list"],[id*="catalog"],[id*="outline"]')
        .forEach((node) => containers.add(node));

    containers.forEach((container) => {
        Array.from(container.querySelectorAll('li,div,span,a,p,button'))
            .filter((el) => {
                if (!isVisible(el) || isIgnoredContainer(el)) return false;
                const text = normalize(el.textContent);
                if (text.length < 2 || text.length > 80) return false;
                return !keywords.some((word) => text === word);
            })
            .slice(0, limit)
            .forEach((el) => add(el, 'outline'));
    });

    if (items.length < 3) {
        for (const el of document.querySelectorAll('a,button,[role="button"],[role="link"],[tabindex]')) {
            if (items.length >= limit) break;
            if (!isVisible(el)) continue;
            const text = normalize(el.textContent || el.getAttribute('aria-label'));
            if (text.length < 2 || text.length > 80) continue;
            add(el, 'fallback');
        }
    }

    return items.slice(0, limit);
})(__LIMIT__)"#;

pub fn candidate_script(limit: usize) -> String {
    COLLECT_CANDIDATES_TEMPLATE.replace("__LIMIT__", &limit.to_string())
}

/// One element as reported by the in-page script, before global numbering.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FrameItem {
    dom_index: usize,
    text: String,
    href: String,
    resource_id: String,
    data_key: String,
    tag: String,
    id: String,
    class_name: String,
    context: String,
    reason: String,
}

/// Scans every frame of the page for lesson candidates, numbering them globally.
/// Frames that cannot be evaluated are skipped.
pub async fn collect_candidates(page: &dyn PageDriver, max_per_frame: usize) -> Result<Vec<Candidate>> {
    let script = candidate_script(max_per_frame);
    let mut candidates = Vec::new();

    for frame in page.frames().await? {
        let value = match page.evaluate_in_frame(&frame, &script).await {
            Ok(value) => value,
            Err(e) => {
                debug!("[scan] frame={} unavailable: {}", frame.url, e);
                continue;
            }
        };
        let items: Vec<FrameItem> = serde_json::from_value(value).unwrap_or_default();
        debug!("[scan] frame={} items={}", frame.url, items.len());

        for item in items {
            candidates.push(Candidate {
                candidate_id: candidates.len(),
                frame_id: frame.index,
                frame_url: frame.url.clone(),
                dom_index: item.dom_index,
                text: item.text,
                href: item.href,
                resource_id: item.resource_id,
                data_key: item.data_key,
                tag: item.tag,
                element_id: item.id,
                class_name: item.class_name,
                context: item.context,
                reason: item.reason,
            });
        }
    }

    Ok(candidates)
}

fn long_digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]{6,}").expect("valid digits regex"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid email regex"))
}

/// Element text safe to send to a model: no long digit runs (phone or
/// account numbers), no e-mail addresses, at most 80 characters.
pub fn sanitize_text(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_digits = long_digits_regex().replace_all(&collapsed, "");
    let without_emails = email_regex().replace_all(&without_digits, "");
    without_emails.trim().chars().take(SANITIZED_TEXT_LIMIT).collect()
}
