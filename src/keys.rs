//! Course and content-block identifiers.
//!
//! Courses are addressed as `course-v1:ORG+COURSE+RUN` (or the deprecated
//! `ORG/COURSE/RUN`), blocks as `block-v1:ORG+COURSE+RUN+type@TYPE+block@ID`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static COURSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^course-v1:([\w\-~.:]+)\+([\w\-~.:]+)\+([\w\-~.:]+)$").expect("valid course regex")
});

static DEPRECATED_COURSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w\-~.:]+)/([\w\-~.:]+)/([\w\-~.:]+)$").expect("valid course regex")
});

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^block-v1:([\w\-~.:]+)\+([\w\-~.:]+)\+([\w\-~.:]+)\+type@([\w\-~.:]+)\+block@([\w\-~.:]+)$",
    )
    .expect("valid block regex")
});

static FILENAME_UNSAFE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-\w.]").expect("valid filename regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid key: {0}")]
pub struct InvalidKeyError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CourseKey {
    pub org: String,
    pub course: String,
    pub run: String,
    deprecated: bool,
}

impl CourseKey {
    pub fn new(org: impl Into<String>, course: impl Into<String>, run: impl Into<String>) -> Self {
        Self { org: org.into(), course: course.into(), run: run.into(), deprecated: false }
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidKeyError> {
        if let Some(caps) = COURSE_RE.captures(raw) {
            return Ok(Self::new(&caps[1], &caps[2], &caps[3]));
        }
        if let Some(caps) = DEPRECATED_COURSE_RE.captures(raw) {
            return Ok(Self {
                org: caps[1].to_string(),
                course: caps[2].to_string(),
                run: caps[3].to_string(),
                deprecated: true,
            });
        }
        Err(InvalidKeyError(raw.to_string()))
    }

    /// `ORG_COURSE_RUN` with anything outside `[-\w.]` removed.
    pub fn filename_prefix(&self) -> String {
        let joined = format!("{}_{}_{}", self.org, self.course, self.run).replace(' ', "_");
        FILENAME_UNSAFE_RE.replace_all(&joined, "").into_owned()
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deprecated {
            write!(f, "{}/{}/{}", self.org, self.course, self.run)
        } else {
            write!(f, "course-v1:{}+{}+{}", self.org, self.course, self.run)
        }
    }
}

impl FromStr for CourseKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    course_key: CourseKey,
    pub block_type: String,
    pub block_id: String,
}

impl UsageKey {
    pub fn parse(raw: &str) -> Result<Self, InvalidKeyError> {
        let caps = BLOCK_RE.captures(raw).ok_or_else(|| InvalidKeyError(raw.to_string()))?;
        Ok(Self {
            course_key: CourseKey::new(&caps[1], &caps[2], &caps[3]),
            block_type: caps[4].to_string(),
            block_id: caps[5].to_string(),
        })
    }

    /// The course that owns this block.
    pub fn course_key(&self) -> &CourseKey {
        &self.course_key
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let course = &self.course_key;
        write!(
            f,
            "block-v1:{}+{}+{}+type@{}+block@{}",
            course.org, course.course, course.run, self.block_type, self.block_id
        )
    }
}

impl FromStr for UsageKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current_course_key() {
        let key = CourseKey::parse("course-v1:org+X+2024").unwrap();
        assert_eq!(key.org, "org");
        assert_eq!(key.course, "X");
        assert_eq!(key.run, "2024");
        assert_eq!(key.to_string(), "course-v1:org+X+2024");
    }

    #[test]
    fn test_parse_deprecated_course_key_keeps_form() {
        let key = CourseKey::parse("mss/999/2022").unwrap();
        assert_eq!(key.run, "2022");
        assert_eq!(key.to_string(), "mss/999/2022");
    }

    #[test]
    fn test_malformed_course_keys() {
        for raw in [
            "",
            "asdasdsadsadasdd",
            "course-v1:org+X",
            "course-v1:org+X+2024+extra",
            "course-v1:org X+c+r",
            "org/course",
            "block-v1:eol+test+2022+type@html+block@abc",
        ] {
            assert!(CourseKey::parse(raw).is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn test_parse_block_key() {
        let raw = "block-v1:eol+test+2022+type@html+block@693c0c6a47h54bd7a52ee9bad58da0fb";
        let key = UsageKey::parse(raw).unwrap();
        assert_eq!(key.block_type, "html");
        assert_eq!(key.course_key().to_string(), "course-v1:eol+test+2022");
        assert_eq!(key.to_string(), raw);
    }

    #[test]
    fn test_malformed_block_keys() {
        for raw in ["asdasdsadsadasdd", "block-v1:eol+test+2022", "course-v1:eol+test+2022", ""] {
            assert!(UsageKey::parse(raw).is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn test_filename_prefix() {
        let key = CourseKey::parse("course-v1:eol+Test:101+2021.1").unwrap();
        assert_eq!(key.filename_prefix(), "eol_Test101_2021.1");
    }
}
