pub const DEFAULT_NPI_API_BASE_URL: &str = "https://npiregistry.cms.hhs.gov/api/";
pub const DEFAULT_NPI_API_VERSION: &str = "2.1";

pub const NPPES_RATE_LIMIT_NOTICE_URL: &str = "https://npiregistry.cms.hhs.gov/";
pub const NPPES_API_DOC_URL: &str = "https://npiregistry.cms.hhs.gov/api-page";

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_CONCURRENCY: usize = 12;
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

pub const USER_AGENT: &str = "npi-enricher/0.1";

/// Input headers, matched after trimming and ignoring ASCII case.
pub const REQUIRED_INPUT_COLUMNS: [&str; 3] = ["First_Name", "Last_Name", "State"];

/// Output header row, in write order.
pub const OUTPUT_COLUMNS: [&str; 15] = [
    "First_Name",
    "Last_Name",
    "State",
    "Found_First_Name",
    "Found_Last_Name",
    "Found_State",
    "Full_Name",
    "NPI",
    "Mailing_Address",
    "Primary_Practice_Address",
    "Secondary_Practice_Address",
    "Taxonomy",
    "Specialty",
    "License",
    "Status",
];
