//! Dialect-independent raw event fields

pub const MAJOR_KEYS: &[&str] = &["major", "majorEventType"];
pub const MINOR_KEYS: &[&str] = &["minor", "subEventType"];
pub const TIME_KEYS: &[&str] = &["time", "dateTime"];
pub const SUBJECT_KEYS: &[&str] = &["employeeNoString", "employeeNo"];
pub const NAME_KEYS: &[&str] = &["name"];
pub const SERIAL_KEYS: &[&str] = &["serialNo"];

/// Fields read from one fragment/object before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEventFields {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub time: Option<String>,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub serial_no: Option<String>,
    /// Values present but unreadable
    pub malformed: Vec<String>,
}

impl RawEventFields {
    pub fn set_major(&mut self, raw: Option<String>) {
        self.major = self.parse_code("major", raw);
    }

    pub fn set_minor(&mut self, raw: Option<String>) {
        self.minor = self.parse_code("minor", raw);
    }

    fn parse_code(&mut self, field: &str, raw: Option<String>) -> Option<u32> {
        let raw = raw?;
        match raw.trim().parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.malformed.push(format!("{}={:?}", field, raw));
                None
            }
        }
    }
}
