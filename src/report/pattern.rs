//! 结果模式匹配
//!
//! 模式可以为空（总是通过）、一个列表（任一匹配即通过），
//! 或者 `{pass, fail}` 结构（任一 fail 命中即失败）。

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 结果判定模式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PatternRepr")]
pub struct PatternSpec {
    pub pass: Vec<String>,
    pub fail: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternRepr {
    Empty(()),
    Single(String),
    List(Vec<String>),
    Structured {
        #[serde(default)]
        pass: Vec<String>,
        #[serde(default)]
        fail: Vec<String>,
    },
}

impl From<PatternRepr> for PatternSpec {
    fn from(repr: PatternRepr) -> Self {
        match repr {
            PatternRepr::Empty(()) => PatternSpec::unspecified(),
            PatternRepr::Single(pattern) if pattern.is_empty() => PatternSpec::unspecified(),
            PatternRepr::Single(pattern) => PatternSpec::any_of([pattern]),
            PatternRepr::List(pass) => PatternSpec {
                pass,
                fail: Vec::new(),
            },
            PatternRepr::Structured { pass, fail } => PatternSpec { pass, fail },
        }
    }
}

impl PatternSpec {
    pub fn unspecified() -> Self {
        Self::default()
    }

    pub fn any_of<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pass: patterns.into_iter().map(Into::into).collect(),
            fail: Vec::new(),
        }
    }

    pub fn pass_fail<P, F, S>(pass: P, fail: F) -> Self
    where
        P: IntoIterator<Item = S>,
        F: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pass: pass.into_iter().map(Into::into).collect(),
            fail: fail.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.pass.is_empty() && self.fail.is_empty()
    }
}

/// 匹配结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternVerdict {
    pub passed: bool,
    pub message: String,
}

impl PatternVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

pub const UNSPECIFIED_MESSAGE: &str = "Pattern unspecified. Proceeding...";

fn compile(patterns: &[String]) -> Result<Vec<Regex>, String> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| format!("Invalid pattern {p}: {e}")))
        .collect()
}

fn collect_hits(regexes: &[Regex], text: &str) -> Vec<String> {
    regexes
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect()
}

/// 按模式判定输出
///
/// fail 模式优先：只要命中任一 fail 就失败。pass 列表为空时只检查 fail。
pub fn match_pattern(spec: &PatternSpec, text: &str) -> PatternVerdict {
    if spec.is_unspecified() {
        return PatternVerdict::pass(UNSPECIFIED_MESSAGE);
    }

    let (pass, fail) = match (compile(&spec.pass), compile(&spec.fail)) {
        (Ok(pass), Ok(fail)) => (pass, fail),
        (Err(e), _) | (_, Err(e)) => return PatternVerdict::fail(e),
    };

    let fail_hits = collect_hits(&fail, text);
    if !fail_hits.is_empty() {
        return PatternVerdict::fail(format!(
            "Fail pattern {} matched in output!!!",
            fail_hits.join("^|^")
        ));
    }

    if pass.is_empty() {
        return PatternVerdict::pass(format!(
            "Fail pattern {:?} not found. Proceeding...",
            spec.fail
        ));
    }

    let pass_hits = collect_hits(&pass, text);
    if pass_hits.is_empty() {
        PatternVerdict::fail(format!("Pattern {:?} not matched in {}!!!", spec.pass, text))
    } else {
        PatternVerdict::pass(format!("Pattern {} matched..!!!", pass_hits.join("^|^")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_always_passes() {
        let verdict = match_pattern(&PatternSpec::unspecified(), "anything");
        assert!(verdict.passed);
        assert!(verdict.message.contains("unspecified"));
    }

    #[test]
    fn test_list_any_match() {
        let spec = PatternSpec::any_of(["finished successfully", "completed"]);
        assert!(match_pattern(&spec, "Install operation 4 finished successfully").passed);
        assert!(!match_pattern(&spec, "Install operation 4 aborted").passed);
    }

    #[test]
    fn test_fail_dominates() {
        let spec = PatternSpec::pass_fail(["OK"], ["ERROR"]);
        let verdict = match_pattern(&spec, "OK\nERROR: disk full");
        assert!(!verdict.passed);
        assert!(verdict.message.contains("ERROR"));
    }

    #[test]
    fn test_fail_only_spec() {
        let spec = PatternSpec::pass_fail(Vec::<String>::new(), vec!["ERROR".to_string()]);
        assert!(match_pattern(&spec, "all good").passed);
        assert!(!match_pattern(&spec, "ERROR").passed);
    }

    #[test]
    fn test_invalid_regex_fails() {
        let spec = PatternSpec::any_of(["("]);
        let verdict = match_pattern(&spec, "(");
        assert!(!verdict.passed);
        assert!(verdict.message.starts_with("Invalid pattern"));
    }

    #[test]
    fn test_deserialize_forms() {
        let list: PatternSpec = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(list, PatternSpec::any_of(["a", "b"]));

        let structured: PatternSpec =
            serde_json::from_str(r#"{"pass": ["a"], "fail": ["b"]}"#).unwrap();
        assert_eq!(structured, PatternSpec::pass_fail(["a"], ["b"]));

        let null: PatternSpec = serde_json::from_str("null").unwrap();
        assert!(null.is_unspecified());

        let single: PatternSpec = serde_json::from_str(r#""done""#).unwrap();
        assert_eq!(single.pass, vec!["done".to_string()]);
    }
}
