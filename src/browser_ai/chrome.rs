use crate::error::{AppError, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Starts and hunts down Chrome processes at the OS level, outside the
/// automation library.
pub struct ChromeController;

/// What the orphan cleanup found and did. Purely informational.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub terminated: Vec<u32>,
    pub problems: Vec<String>,
}

impl ChromeController {
    /// Starts Chrome through the platform's "open application" mechanism.
    /// Nothing is returned that could be used to stop it again.
    pub fn open_application(chrome_path: Option<&str>, args: &[String]) -> Result<()> {
        #[cfg(target_os = "macos")]
        {
            let _ = chrome_path;
            let status = Command::new("open")
                .args(["-na", "Google Chrome", "--args"])
                .args(args)
                .status()
                .map_err(|e| AppError::Browser(format!("Failed to open Chrome: {}", e)))?;
            if !status.success() {
                return Err(AppError::Browser(format!("open exited with {}", status)));
            }
        }

        #[cfg(target_os = "windows")]
        {
            let program = chrome_path.unwrap_or("chrome");
            Command::new("cmd")
                .args(["/C", "start", "", program])
                .args(args)
                .status()
                .map_err(|e| AppError::Browser(format!("Failed to open Chrome: {}", e)))?;
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let program = chrome_path.unwrap_or("google-chrome");
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| AppError::Browser(format!("Failed to open Chrome ({}): {}", program, e)))?;
        }

        Ok(())
    }

    /// Processes listening on `port`, via `lsof`.
    pub fn find_listening_pids(port: u16) -> Result<Vec<u32>> {
        let output = Command::new("lsof")
            .args([format!("-iTCP:{}", port).as_str(), "-sTCP:LISTEN", "-n", "-P", "-t"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| AppError::Browser(format!("Failed to run lsof: {}", e)))?;
        Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Processes whose command line carries `--user-data-dir=<dir>`, via `ps`.
    pub fn find_pids_by_user_data_dir(user_data_dir: &Path) -> Result<Vec<u32>> {
        let output = Command::new("ps")
            .args(["aux"])
            .output()
            .map_err(|e| AppError::Browser(format!("Failed to run ps: {}", e)))?;
        Ok(parse_ps_for_profile(
            &String::from_utf8_lossy(&output.stdout),
            user_data_dir,
        ))
    }

    pub fn is_chrome_running_with_profile(user_data_dir: &Path) -> bool {
        Self::find_pids_by_user_data_dir(user_data_dir)
            .map(|pids| !pids.is_empty())
            .unwrap_or(false)
    }

    /// Best-effort cleanup of a browser started with `open_application`:
    /// first whatever listens on the debug port, then anything still using
    /// the profile directory. Never fails.
    pub fn terminate_orphaned_browser(port: u16, user_data_dir: &Path) -> CleanupReport {
        let mut report = CleanupReport::default();

        if !cfg!(unix) {
            report.problems.push("process cleanup is only supported on unix".to_string());
            return report;
        }

        match Self::find_listening_pids(port) {
            Ok(pids) => Self::terminate_all(&pids, &mut report),
            Err(e) => report.problems.push(e.to_string()),
        }

        match Self::find_pids_by_user_data_dir(user_data_dir) {
            Ok(pids) => {
                let remaining: Vec<u32> = pids
                    .into_iter()
                    .filter(|pid| !report.terminated.contains(pid))
                    .collect();
                Self::terminate_all(&remaining, &mut report);
            }
            Err(e) => report.problems.push(e.to_string()),
        }

        report
    }

    fn terminate_all(pids: &[u32], report: &mut CleanupReport) {
        for pid in pids {
            match Command::new("kill").arg(pid.to_string()).status() {
                Ok(status) if status.success() => report.terminated.push(*pid),
                Ok(status) => report.problems.push(format!("kill {} exited with {}", pid, status)),
                Err(e) => report.problems.push(format!("kill {} failed: {}", pid, e)),
            }
        }
    }
}

/// One pid per line, as printed by `lsof -t`.
pub fn parse_pid_lines(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Pids (second column of `ps aux`) of processes started with the profile.
pub fn parse_ps_for_profile(ps_output: &str, user_data_dir: &Path) -> Vec<u32> {
    let needle = format!("--user-data-dir={}", user_data_dir.display());
    ps_output
        .lines()
        .filter(|line| line.contains(&needle))
        .filter(|line| !line.contains(" grep "))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|pid| pid.parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_pid_lines() {
        assert_eq!(parse_pid_lines("1234\n 5678 \n\nnot-a-pid\n"), vec![1234, 5678]);
        assert!(parse_pid_lines("").is_empty());
    }

    #[test]
    fn test_parse_ps_matches_profile_only() {
        let dir = PathBuf::from("/home/ferris/data/chrome-profile");
        let ps = "\
USER   PID %CPU %MEM COMMAND
ferris 4100 0.0 1.2 /opt/google/chrome/chrome --remote-debugging-port=9222 --user-data-dir=/home/ferris/data/chrome-profile
ferris 4101 0.0 0.8 /opt/google/chrome/chrome --type=renderer --user-data-dir=/home/ferris/data/chrome-profile
ferris 4200 0.0 0.8 /opt/google/chrome/chrome --user-data-dir=/tmp/other-profile
";
        assert_eq!(parse_ps_for_profile(ps, &dir), vec![4100, 4101]);
    }
}
