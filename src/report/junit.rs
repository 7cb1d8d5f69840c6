//! JUnit XML 报告

use super::record::{RecordError, TestCaseResult, TestStatus};
use std::fmt::Write as _;
use std::path::Path;

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\t' | '\n' | '\r' => escaped.push(ch),
            // XML 1.0 不允许的控制字符，例如终端转义序列
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn next_level_output(result: &TestCaseResult) -> Option<String> {
    if result.next_level.is_empty() {
        return None;
    }
    let lines: Vec<String> = result
        .next_level
        .iter()
        .map(|entry| {
            let verdict = if entry.passed { "PASS" } else { "FAIL" };
            format!("{verdict} {} :: {}", entry.command, entry.message)
        })
        .collect();
    Some(escape(&lines.join("\n")))
}

/// 将测试用例结果渲染为 JUnit XML
pub fn render(suite_name: &str, results: &[TestCaseResult]) -> String {
    let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
    let failures = count(TestStatus::Fail);
    let errors = count(TestStatus::Error) + count(TestStatus::Unknown);
    let skipped = results.iter().filter(|r| r.status.is_pending()).count();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\">",
        escape(suite_name),
        results.len(),
        failures,
        errors,
        skipped
    );

    for result in results {
        let _ = write!(
            xml,
            "  <testcase classname=\"{}\" name=\"{}\" id=\"{}\"",
            escape(suite_name),
            escape(&result.name),
            result.tc_id
        );
        let message = escape(&result.message);
        let mut body = String::new();
        match result.status {
            TestStatus::Pass => {}
            TestStatus::Fail => {
                let _ = writeln!(
                    body,
                    "    <failure message=\"{message}\">{message}</failure>"
                );
            }
            TestStatus::Error | TestStatus::Unknown => {
                let _ = writeln!(
                    body,
                    "    <error message=\"{message}\">{}</error>",
                    result.status
                );
            }
            TestStatus::NotRun | TestStatus::Blocked => {
                let _ = writeln!(body, "    <skipped message=\"{message}\"/>");
            }
        }
        if let Some(output) = next_level_output(result) {
            let _ = writeln!(body, "    <system-out>{output}</system-out>");
        }

        if body.is_empty() {
            xml.push_str("/>\n");
        } else {
            let _ = write!(xml, ">\n{body}  </testcase>\n");
        }
    }

    xml.push_str("</testsuite>\n");
    xml
}

pub fn write_report(
    path: &Path,
    suite_name: &str,
    results: &[TestCaseResult],
) -> Result<(), RecordError> {
    std::fs::write(path, render(suite_name, results))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NextLevelResult;

    fn row(tc_id: usize, name: &str, status: TestStatus, message: &str) -> TestCaseResult {
        TestCaseResult {
            tc_id,
            name: name.to_string(),
            status,
            message: message.to_string(),
            next_level: Vec::new(),
        }
    }

    #[test]
    fn test_render_counts_and_escaping() {
        let results = vec![
            row(1, "add", TestStatus::Pass, "ok"),
            row(2, "activate", TestStatus::Fail, "Pattern <x> & \"y\" not matched"),
            row(3, "commit", TestStatus::Blocked, "Not Run"),
            row(4, "cmd", TestStatus::Error, "connection lost"),
        ];
        let xml = render("suite_a", &results);

        assert!(xml.contains("tests=\"4\" failures=\"1\" errors=\"1\" skipped=\"1\""));
        assert!(xml.contains("<testcase classname=\"suite_a\" name=\"add\" id=\"1\"/>"));
        assert!(xml.contains("Pattern &lt;x&gt; &amp; &quot;y&quot; not matched"));
        assert!(xml.contains("<skipped message=\"Not Run\"/>"));
        assert!(xml.trim_end().ends_with("</testsuite>"));
    }

    #[test]
    fn test_control_characters_are_dropped() {
        let results = vec![row(
            1,
            "cmd",
            TestStatus::Fail,
            "\u{1b}[0mRP/0/RP0/CPU0:r1#\u{7}\tdone\r\n",
        )];
        let xml = render("suite_a", &results);

        assert!(!xml.contains('\u{1b}'));
        assert!(!xml.contains('\u{7}'));
        assert!(xml.contains("[0mRP/0/RP0/CPU0:r1#\tdone\r\n"));
    }

    #[test]
    fn test_next_level_rendered_as_system_out() {
        let mut passed = row(1, "activate", TestStatus::Pass, "ok");
        passed.next_level.push(NextLevelResult {
            command: "show install active".to_string(),
            passed: false,
            message: "Pattern <mpls> not matched".to_string(),
        });
        let xml = render("suite_a", &[passed]);

        assert!(xml.contains("failures=\"0\""));
        assert!(xml.contains(
            "<system-out>FAIL show install active :: Pattern &lt;mpls&gt; not matched</system-out>"
        ));
        assert!(xml.contains("  </testcase>"));
    }
}
