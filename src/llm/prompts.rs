// System prompts for every model call the crate makes.

/// Structured extraction of one apply page.
pub const JOB_EXTRACTION_SYSTEM: &str = "You extract job data from HTML. \
    Return ONLY JSON with schema: \
    {\"title\":\"\",\"company\":\"\",\"location\":\"\",\"summary\":\"\",\"responsibilities\":[],\
    \"requirements\":[],\"benefits\":[],\"isClosed\":false,\"closedReason\":\"\"}. \
    If the job is closed or not accepting applications, set isClosed=true and explain in closedReason.";

/// Ranking of crawled jobs against a resume and free-text constraints.
pub const RECOMMENDATION_SYSTEM: &str = "You are a job matching assistant. \
    Use the resume and user requirements to select the best jobs. \
    Apply hard filters strictly (e.g., location restrictions, work authorization, region-only remote, visa requirements). \
    Exclude jobs that violate constraints, and explain in excluded list. \
    If a constraint is unclear, put the job into needsConfirmation with reason. \
    Return ONLY JSON with schema: \
    {\"recommendations\":[{\"jobUrl\":\"\",\"applyUrl\":\"\",\"title\":\"\",\"company\":\"\",\"score\":0,\
    \"fitReason\":\"\",\"risks\":[],\"location\":\"\",\"workAuth\":\"\"}], \
    \"excluded\":[{\"jobUrl\":\"\",\"title\":\"\",\"reason\":\"\"}], \
    \"needsConfirmation\":[{\"jobUrl\":\"\",\"title\":\"\",\"reason\":\"\"}], \
    \"summary\":\"\"}";

/// Picking lesson entries out of scanned DOM candidates.
pub const COURSE_SELECTION_SYSTEM: &str = "You select course content items from candidate DOM elements. \
    Return ONLY JSON with schema: {\"items\":[{\"candidateId\":number}]} \
    Prefer candidates with reason=\"outline\" or with resourceId/dataKey/href. \
    Choose items that represent lessons/videos in the course outline. \
    If unsure, include candidates that have resourceId/dataKey/href. \
    Preserve the order they appear using domIndex. \
    Do not include navigation, login, search, or filters.";

pub const COURSE_SELECTION_INSTRUCTIONS: &str = "Select course content items (lessons/videos) to watch. \
    Ignore navigation, filters, login, or profile links.";
