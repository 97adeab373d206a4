//! Analysis request payloads and their normalization
//!
//! Form input arrives loosely typed (numbers as strings, several spellings
//! of gender). Everything is normalized here before a slot or token is touched.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Accept `"1990"` and `1990` alike
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.trim().to_string(),
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => format!("{}", f),
        Raw::Null(()) => String::new(),
    })
}

/// Birth details of one person as submitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub birth_year: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub birth_month: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub birth_day: String,
    /// `HH:MM`, `HH:MM:SS`, or empty / `99:99:99` when unknown
    #[serde(default)]
    pub birth_time: String,
    /// `self`, `relative` or `new`
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub relative_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "m" | "male" | "man" | "남" | "남성" => Some(Gender::Male),
            "f" | "female" | "woman" | "여" | "여성" => Some(Gender::Female),
            _ => None,
        }
    }

    /// Stored form (`M` / `F`)
    pub fn db_code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }

    /// Chart API parameter value
    pub fn api_value(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Which stored profile the person corresponds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// The logged-in user's own profile
    SelfProfile,
    /// A saved relative
    Relative(i64),
    /// Ad-hoc input, nothing stored
    New,
}

impl TargetType {
    pub fn resolve(target: &str, relative_id: Option<i64>) -> Self {
        if target.trim().eq_ignore_ascii_case("self") {
            return TargetType::SelfProfile;
        }
        match relative_id {
            Some(id) if id > 0 => TargetType::Relative(id),
            _ => TargetType::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::SelfProfile => "self",
            TargetType::Relative(_) => "relative",
            TargetType::New => "new",
        }
    }
}

/// Validated birth date and optional time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BirthDetails {
    pub date: NaiveDate,
    /// `None` when the birth time is unknown
    pub time: Option<NaiveTime>,
}

/// Sentinel stored for an unknown birth time
pub const UNKNOWN_BIRTH_TIME: &str = "99:99:99";

impl BirthDetails {
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn time_string(&self) -> String {
        match self.time {
            Some(t) => t.format("%H:%M:%S").to_string(),
            None => UNKNOWN_BIRTH_TIME.to_string(),
        }
    }

    /// Human-readable form used in reports
    pub fn display(&self) -> String {
        format!(
            "{}-{:02}-{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day()
        )
    }

    /// Full years lived as of `today`
    pub fn age_on(&self, today: NaiveDate) -> i32 {
        let mut age = today.year() - self.date.year();
        if (today.month(), today.day()) < (self.date.month(), self.date.day()) {
            age -= 1;
        }
        age.max(0)
    }
}

/// Life stage wording fed to the prompt
pub fn life_stage(age: i32) -> &'static str {
    match age {
        a if a < 20 => "teens",
        a if a < 25 => "early 20s",
        a if a < 28 => "mid 20s",
        a if a < 30 => "late 20s",
        a if a < 35 => "early 30s",
        a if a < 38 => "mid 30s",
        a if a < 40 => "late 30s",
        a if a < 45 => "early 40s",
        a if a < 48 => "mid 40s",
        a if a < 50 => "late 40s",
        a if a < 55 => "early 50s",
        a if a < 58 => "mid 50s",
        a if a < 60 => "late 50s",
        _ => "60 and over",
    }
}

/// Input rejected before any job work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct InputError {
    pub code: &'static str,
    pub message: String,
}

impl InputError {
    pub fn invalid_gender() -> Self {
        Self {
            code: "INVALID_GENDER",
            message: "Gender must be male or female".to_string(),
        }
    }

    pub fn invalid_birth(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_BIRTH_INPUT",
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_INPUT",
            message: message.into(),
        }
    }

    pub fn missing_fields(missing: &[String]) -> Self {
        Self::invalid(format!("Required fields missing: {}", missing.join(", ")))
    }
}

/// Fully validated person
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonProfile {
    pub name: String,
    pub gender: Gender,
    pub birth: BirthDetails,
    pub target: TargetType,
}

fn parse_birth_time(raw: &str) -> Result<Option<NaiveTime>, InputError> {
    let value = raw.trim();
    if value.is_empty()
        || value == UNKNOWN_BIRTH_TIME
        || value == "99:99"
        || value.eq_ignore_ascii_case("unknown")
    {
        return Ok(None);
    }
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(Some)
        .map_err(|_| InputError::invalid_birth(format!("Invalid birth time: {}", value)))
}

impl PersonInput {
    /// Names of the birth fields left blank, prefixed (`person.name`) when `prefix` is given
    pub fn missing_fields(&self, prefix: Option<&str>, require_time: bool) -> Vec<String> {
        let mut fields = vec![
            ("name", &self.name),
            ("gender", &self.gender),
            ("birth_year", &self.birth_year),
            ("birth_month", &self.birth_month),
            ("birth_day", &self.birth_day),
        ];
        if require_time {
            fields.push(("birth_time", &self.birth_time));
        }
        fields
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| match prefix {
                Some(p) => format!("{}.{}", p, field),
                None => field.to_string(),
            })
            .collect()
    }

    pub fn normalize(&self) -> Result<PersonProfile, InputError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(InputError::invalid("Name is required"));
        }

        let gender = Gender::parse(&self.gender).ok_or_else(InputError::invalid_gender)?;

        let year: i32 = self
            .birth_year
            .trim()
            .parse()
            .map_err(|_| InputError::invalid_birth("Invalid birth year"))?;
        let month: u32 = self
            .birth_month
            .trim()
            .parse()
            .map_err(|_| InputError::invalid_birth("Invalid birth month"))?;
        let day: u32 = self
            .birth_day
            .trim()
            .parse()
            .map_err(|_| InputError::invalid_birth("Invalid birth day"))?;

        if !(1900..=2100).contains(&year) {
            return Err(InputError::invalid_birth("Birth year out of range"));
        }
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            InputError::invalid_birth(format!("No such date: {}-{}-{}", year, month, day))
        })?;

        let time = parse_birth_time(&self.birth_time)?;

        Ok(PersonProfile {
            name: name.to_string(),
            gender,
            birth: BirthDetails { date, time },
            target: TargetType::resolve(&self.target, self.relative_id),
        })
    }
}

/// Counseling tone applied on top of the base system prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounselingTone {
    Soft,
    #[default]
    Balanced,
    Insight,
    Direct,
    Factbomb,
}

impl CounselingTone {
    pub const ALL: [CounselingTone; 5] = [
        CounselingTone::Soft,
        CounselingTone::Balanced,
        CounselingTone::Insight,
        CounselingTone::Direct,
        CounselingTone::Factbomb,
    ];

    /// Unknown or empty values fall back to `Balanced`
    pub fn parse(raw: &str) -> Self {
        let key = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tone| tone.key() == key)
            .unwrap_or_default()
    }

    pub fn key(&self) -> &'static str {
        match self {
            CounselingTone::Soft => "soft",
            CounselingTone::Balanced => "balanced",
            CounselingTone::Insight => "insight",
            CounselingTone::Direct => "direct",
            CounselingTone::Factbomb => "factbomb",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CounselingTone::Soft => "Gentle counseling",
            CounselingTone::Balanced => "Balanced counseling",
            CounselingTone::Insight => "Deep insight",
            CounselingTone::Direct => "Direct counseling",
            CounselingTone::Factbomb => "Blunt facts",
        }
    }
}

/// Pricing mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisMode {
    #[default]
    Premium,
    Trial,
}

impl AnalysisMode {
    /// Anything other than `TRIAL` is premium
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("trial") {
            AnalysisMode::Trial
        } else {
            AnalysisMode::Premium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Premium => "PREMIUM",
            AnalysisMode::Trial => "TRIAL",
        }
    }
}

/// POST /api/saju/request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SajuRequest {
    #[serde(flatten)]
    pub person: PersonInput,
    #[serde(default)]
    pub counseling_type: String,
    #[serde(default)]
    pub analysis_mode: String,
}

/// Fortune product variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FortuneFeature {
    Compatibility,
    Today,
    Flow,
    Naming,
    DateSelection,
}

impl FortuneFeature {
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "compatibility" => Some(FortuneFeature::Compatibility),
            "today" => Some(FortuneFeature::Today),
            "flow" => Some(FortuneFeature::Flow),
            "naming" => Some(FortuneFeature::Naming),
            "date-selection" => Some(FortuneFeature::DateSelection),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            FortuneFeature::Compatibility => "compatibility",
            FortuneFeature::Today => "today",
            FortuneFeature::Flow => "flow",
            FortuneFeature::Naming => "naming",
            FortuneFeature::DateSelection => "date-selection",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FortuneFeature::Compatibility => "Compatibility",
            FortuneFeature::Today => "Today's fortune",
            FortuneFeature::Flow => "Luck cycle flow",
            FortuneFeature::Naming => "Naming assistant",
            FortuneFeature::DateSelection => "Date selection",
        }
    }

    /// Ledger usage code for the debit
    pub fn usage_code(&self) -> &'static str {
        match self {
            FortuneFeature::Compatibility => "COMPATIBILITY_VIEW",
            FortuneFeature::Today => "TODAY_FORTUNE_VIEW",
            FortuneFeature::Flow => "FLOW_FORTUNE_VIEW",
            FortuneFeature::Naming => "NAMING_VIEW",
            FortuneFeature::DateSelection => "DATE_SELECTION_VIEW",
        }
    }
}

/// POST /api/fortune/:feature/request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FortuneRequest {
    #[serde(default)]
    pub person: PersonInput,
    /// Second person, compatibility only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<PersonInput>,
    #[serde(default)]
    pub relationship: String,
    #[serde(default)]
    pub focus_area: String,
    #[serde(default)]
    pub target_period: String,
    #[serde(default)]
    pub candidate_name: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub candidate_date: String,
    #[serde(default)]
    pub analysis_mode: String,
}

impl FortuneRequest {
    /// Required fields left blank for `feature`
    pub fn missing_fields(&self, feature: FortuneFeature) -> Vec<String> {
        let blank = |v: &String| v.trim().is_empty();

        if feature == FortuneFeature::Compatibility {
            let mut missing = Vec::new();
            if blank(&self.relationship) {
                missing.push("relationship".to_string());
            }
            missing.extend(self.person.missing_fields(Some("person"), true));
            match &self.partner {
                Some(partner) => missing.extend(partner.missing_fields(Some("partner"), true)),
                None => missing.push("partner".to_string()),
            }
            return missing;
        }

        let mut missing = self.person.missing_fields(None, true);
        let extra: Vec<(&str, &String)> = match feature {
            FortuneFeature::Today => vec![("focus_area", &self.focus_area)],
            FortuneFeature::Flow => vec![("target_period", &self.target_period)],
            FortuneFeature::Naming => vec![("candidate_name", &self.candidate_name)],
            FortuneFeature::DateSelection => vec![
                ("event_type", &self.event_type),
                ("candidate_date", &self.candidate_date),
            ],
            FortuneFeature::Compatibility => Vec::new(),
        };
        missing.extend(
            extra
                .iter()
                .filter(|(_, v)| v.trim().is_empty())
                .map(|(k, _)| k.to_string()),
        );
        missing
    }

    /// Persons analysed by the feature, in order
    pub fn persons(&self) -> Vec<&PersonInput> {
        let mut persons = vec![&self.person];
        if let Some(partner) = &self.partner {
            persons.push(partner);
        }
        persons
    }
}
