use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize, Serializer};

/// Policy cap on a single course slot, applied at entry validation only.
pub const DEFAULT_MAX_COURSE_MINUTES: i64 = 120;

pub fn parse_day(raw: &str) -> Option<Weekday> {
    raw.trim().parse::<Weekday>().ok()
}

pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn fmt_hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// `""`, `"none"` (any case) and a missing value all mean "no room".
pub fn normalize_room(raw: Option<&str>) -> Option<String> {
    let t = raw?.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(t.to_string())
}

/// A same-day slot, half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeInterval {
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Result<Self, String> {
        if start >= end {
            return Err(format!(
                "start time {} must be before end time {}",
                fmt_hhmm(start),
                fmt_hhmm(end)
            ));
        }
        Ok(Self { day, start, end })
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }

    fn describe(&self) -> String {
        format!(
            "{} between {} and {}",
            day_name(self.day),
            fmt_hhmm(self.start),
            fmt_hhmm(self.end)
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeIntervalWire {
    day: &'static str,
    start: String,
    end: String,
    duration_minutes: i64,
}

impl Serialize for TimeInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TimeIntervalWire {
            day: day_name(self.day),
            start: fmt_hhmm(self.start),
            end: fmt_hhmm(self.end),
            duration_minutes: self.duration_minutes(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAssignment {
    /// Empty for a candidate that has not been stored yet.
    pub id: String,
    pub school_year: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub class_id: String,
    pub room_id: Option<String>,
    pub slot: TimeInterval,
}

/// Raw form input for a course assignment, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub school_year: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn required(
    value: &Option<String>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            errors.push(FieldError::new(field, format!("{} is required", field)));
            None
        }
    }
}

/// Entry-level checks for a course assignment. Collects every field error
/// instead of stopping at the first one. `max_minutes` of `None` skips the
/// duration policy (used for rows that are already stored).
pub fn validate_assignment(
    draft: &AssignmentDraft,
    max_minutes: Option<i64>,
) -> Result<CourseAssignment, Vec<FieldError>> {
    let mut errors = Vec::new();

    let school_year = required(&draft.school_year, "schoolYear", &mut errors);
    let subject_id = required(&draft.subject_id, "subjectId", &mut errors);
    let teacher_id = required(&draft.teacher_id, "teacherId", &mut errors);
    let class_id = required(&draft.class_id, "classId", &mut errors);

    let day = match required(&draft.day, "day", &mut errors) {
        Some(raw) => {
            let parsed = parse_day(&raw);
            if parsed.is_none() {
                errors.push(FieldError::new("day", format!("unknown day: {}", raw)));
            }
            parsed
        }
        None => None,
    };
    let mut parse_time = |value: &Option<String>, field: &'static str| {
        let raw = required(value, field, &mut errors)?;
        let parsed = parse_hhmm(&raw);
        if parsed.is_none() {
            errors.push(FieldError::new(field, format!("{} must be HH:MM", field)));
        }
        parsed
    };
    let start = parse_time(&draft.start_time, "startTime");
    let end = parse_time(&draft.end_time, "endTime");

    let slot = match (day, start, end) {
        (Some(day), Some(start), Some(end)) => match TimeInterval::new(day, start, end) {
            Ok(slot) => Some(slot),
            Err(msg) => {
                errors.push(FieldError::new("endTime", msg));
                None
            }
        },
        _ => None,
    };
    if let (Some(slot), Some(max)) = (slot, max_minutes) {
        if slot.duration_minutes() > max {
            errors.push(FieldError::new(
                "endTime",
                format!("a course cannot last more than {} minutes", max),
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    match (school_year, subject_id, teacher_id, class_id, slot) {
        (Some(school_year), Some(subject_id), Some(teacher_id), Some(class_id), Some(slot)) => {
            Ok(CourseAssignment {
                id: draft
                    .id
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                school_year,
                subject_id,
                teacher_id,
                class_id,
                room_id: normalize_room(draft.room_id.as_deref()),
                slot,
            })
        }
        _ => Err(errors),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Teacher,
    Class,
    Room,
}

impl ConflictKind {
    const ALL: [ConflictKind; 3] = [ConflictKind::Teacher, ConflictKind::Class, ConflictKind::Room];

    fn shares_resource(self, a: &CourseAssignment, b: &CourseAssignment) -> bool {
        match self {
            ConflictKind::Teacher => a.teacher_id == b.teacher_id,
            ConflictKind::Class => a.class_id == b.class_id,
            ConflictKind::Room => match (&a.room_id, &b.room_id) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn message(self, candidate: &CourseAssignment, hits: usize) -> String {
        let when = candidate.slot.describe();
        let mut msg = match self {
            ConflictKind::Teacher => format!(
                "teacher {} is already assigned on {}",
                candidate.teacher_id, when
            ),
            ConflictKind::Class => {
                format!("class {} already has a course on {}", candidate.class_id, when)
            }
            ConflictKind::Room => format!(
                "room {} is already booked on {}",
                candidate.room_id.as_deref().unwrap_or_default(),
                when
            ),
        };
        if hits > 1 {
            msg.push_str(&format!(" ({} conflicting courses)", hits));
        }
        msg
    }
}

/// How many conflicting assignments a report carries per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictScan {
    #[default]
    All,
    FirstMatch,
}

impl ConflictScan {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "firstmatch" => Some(Self::FirstMatch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::FirstMatch => "firstMatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub message: String,
    pub conflicting: Vec<CourseAssignment>,
    pub slot: TimeInterval,
}

fn is_same_assignment(candidate: &CourseAssignment, other: &CourseAssignment) -> bool {
    !candidate.id.is_empty() && candidate.id == other.id
}

/// Checks `candidate` against `existing` for teacher, class and room
/// exclusivity. Reports come back in that order, at most one per kind.
/// An empty result means the candidate can be inserted.
pub fn find_conflicts(
    candidate: &CourseAssignment,
    existing: &[CourseAssignment],
    scan: ConflictScan,
) -> Vec<ConflictReport> {
    let overlapping: Vec<&CourseAssignment> = existing
        .iter()
        .filter(|a| !is_same_assignment(candidate, a))
        .filter(|a| a.school_year == candidate.school_year)
        .filter(|a| candidate.slot.overlaps(&a.slot))
        .collect();

    let mut reports = Vec::new();
    for kind in ConflictKind::ALL {
        let mut hits = overlapping
            .iter()
            .filter(|a| kind.shares_resource(candidate, a))
            .map(|a| (*a).clone());
        let conflicting: Vec<CourseAssignment> = match scan {
            ConflictScan::All => hits.collect(),
            ConflictScan::FirstMatch => hits.next().into_iter().collect(),
        };
        if conflicting.is_empty() {
            continue;
        }
        reports.push(ConflictReport {
            kind,
            message: kind.message(candidate, conflicting.len()),
            conflicting,
            slot: candidate.slot,
        });
    }
    reports
}

/// Read-only source of the assignments a candidate is compared against.
pub trait AssignmentRepository {
    fn list_assignments(&self, school_year: &str) -> anyhow::Result<Vec<CourseAssignment>>;
}

impl AssignmentRepository for [CourseAssignment] {
    fn list_assignments(&self, school_year: &str) -> anyhow::Result<Vec<CourseAssignment>> {
        Ok(self
            .iter()
            .filter(|a| a.school_year == school_year)
            .cloned()
            .collect())
    }
}

pub fn check_assignment<R>(
    repo: &R,
    candidate: &CourseAssignment,
    scan: ConflictScan,
) -> anyhow::Result<Vec<ConflictReport>>
where
    R: AssignmentRepository + ?Sized,
{
    let existing = repo.list_assignments(&candidate.school_year)?;
    Ok(find_conflicts(candidate, &existing, scan))
}
