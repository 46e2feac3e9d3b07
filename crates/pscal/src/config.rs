/// Service configuration, read from a JSON file
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::FeedError;
use crate::schedule::TimezoneBlock;

/// Environment variable that overrides the configured database path.
pub const DATABASE_ENV: &str = "PSCAL_DATABASE";

/// Which identifying field is published for each student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentIdentity {
    #[default]
    Username,
    Birthdate,
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path to the PowerSchool-shaped SQLite database
    pub database: PathBuf,
    /// Listen address for `serve`
    pub address: String,
    /// `Cache-Control` max-age for served feeds, in seconds
    pub max_age_secs: u64,
    pub school_id: i64,
    /// Used in calendar names and descriptions, e.g. "IMSA PowerSchool"
    pub org_name: String,
    /// Mail and UID domain
    pub org_domain: String,
    /// IANA zone in which bell times are interpreted
    pub timezone: String,
    /// Published VTIMEZONE definition for `timezone`
    pub vtimezone: TimezoneBlock,
    pub student_identity: StudentIdentity,
    /// Course numbers that never appear in teacher feeds
    pub excluded_courses: Vec<String>,
    /// Course numbers that never appear in room feeds
    pub excluded_room_courses: Vec<String>,
    /// Periods numbered at or above this are not classes
    pub max_period: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("powerschool.db"),
            address: "0.0.0.0:8080".to_string(),
            max_age_secs: 8 * 3600,
            school_id: 140177,
            org_name: "IMSA".to_string(),
            org_domain: "imsa.edu".to_string(),
            timezone: "America/Chicago".to_string(),
            vtimezone: TimezoneBlock::america_chicago(),
            student_identity: StudentIdentity::Username,
            // Res Life, LASSI, Nav, LEAD, I-Day attendance
            excluded_courses: ["SLD100", "SLD102", "SLD200", "SLD210", "SLD600"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            // Nav sections still occupy their rooms
            excluded_room_courses: ["SLD100", "SLD102", "SLD210", "SLD600"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_period: 21,
        }
    }
}

impl ServiceConfig {
    /// Loads the configuration file, falling back to defaults when it does not exist.
    ///
    /// # Arguments
    /// * `path` - Path to a JSON configuration file
    ///
    /// # Returns
    /// * `Ok(ServiceConfig)` - Parsed and validated configuration
    /// * `Err` - If the file can't be read or parsed, or fails validation
    pub fn load(path: &Path) -> Result<Self, FeedError> {
        let mut config = if path.exists() {
            info!("Reading {} for configuration", path.display());
            let content = fs::read_to_string(path).map_err(|e| FeedError::Config {
                message: format!("cannot read {}: {e}", path.display()),
            })?;
            Self::from_json(&content)?
        } else {
            info!("{} not found, using default configuration", path.display());
            Self::default()
        };

        if let Ok(database) = std::env::var(DATABASE_ENV) {
            config.database = PathBuf::from(database);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json(content: &str) -> Result<Self, FeedError> {
        serde_json::from_str(content).map_err(|e| FeedError::Config {
            message: format!("cannot decode configuration: {e}"),
        })
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.database.as_os_str().is_empty() {
            return Err(FeedError::Config {
                message: "database path is empty".to_string(),
            });
        }
        if self.vtimezone.tzid != self.timezone {
            return Err(FeedError::Config {
                message: format!(
                    "vtimezone describes {} but timezone is {}",
                    self.vtimezone.tzid, self.timezone
                ),
            });
        }
        self.tz()?;
        Ok(())
    }

    /// The configured zone from the tz database.
    pub fn tz(&self) -> Result<Tz, FeedError> {
        self.timezone.parse::<Tz>().map_err(|e| FeedError::Config {
            message: format!("unknown timezone {:?}: {e}", self.timezone),
        })
    }
}
