//! Code analyzer agent.
//!
//! Produces a quality score in [0, 100], security and style findings,
//! complexity metrics, and a human-readable summary with recommendations.
//!
//! Python-family sources get a structure scan: leading keywords and
//! indentation drive decision-point counting (cyclomatic = 1 + decision
//! points) and nesting depth. JavaScript/TypeScript adds `var` and console
//! checks. Every other language is pattern-matched only.

use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use chrono::Utc;
use regex::RegexBuilder;
use serde_json::{Map, Value as JsonValue, json};
use tokio_util::sync::CancellationToken;

/// The code analyzer agent.
pub struct CodeAnalyzerAgent {
    security_patterns: Vec<SecurityPattern>,
}

struct SecurityPattern {
    name: &'static str,
    regex: regex::Regex,
    severity: &'static str,
    description: &'static str,
    recommendation: &'static str,
}

fn pattern(
    name: &'static str,
    raw: &str,
    severity: &'static str,
    description: &'static str,
    recommendation: &'static str,
) -> SecurityPattern {
    let regex = RegexBuilder::new(raw)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("valid security pattern");
    SecurityPattern {
        name,
        regex,
        severity,
        description,
        recommendation,
    }
}

impl CodeAnalyzerAgent {
    /// Creates the agent with its built-in security patterns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            security_patterns: vec![
                pattern(
                    "sql_injection",
                    r#"(execute|query|cursor\.execute)\s*\(\s*["'][^"']*%[sd]"#,
                    "critical",
                    "Potential SQL injection vulnerability",
                    "Use parameterized queries or prepared statements",
                ),
                pattern(
                    "hardcoded_password",
                    r#"(password|pwd|pass)\s*=\s*["'][^"']{3,}["']"#,
                    "high",
                    "Hardcoded password detected",
                    "Use environment variables or secure configuration",
                ),
                pattern(
                    "eval_usage",
                    r"\beval\s*\(",
                    "high",
                    "Use of eval() function",
                    "Avoid eval() as it can execute arbitrary code",
                ),
                pattern(
                    "md5_usage",
                    r"\bmd5\s*\(",
                    "medium",
                    "Use of MD5 hash algorithm",
                    "Use SHA-256 or stronger hash algorithms",
                ),
            ],
        }
    }

    fn check_security(&self, code: &str) -> Vec<JsonValue> {
        let mut issues = Vec::new();
        for pattern in &self.security_patterns {
            for found in pattern.regex.find_iter(code) {
                let line = code[..found.start()].matches('\n').count() + 1;
                issues.push(json!({
                    "type": "security",
                    "severity": pattern.severity,
                    "pattern": pattern.name,
                    "description": pattern.description,
                    "line": line,
                    "matched_text": found.as_str(),
                    "recommendation": pattern.recommendation,
                }));
            }
        }
        issues
    }

    fn analyze_python(&self, code: &str) -> Result<JsonValue, AgentFailure> {
        check_bracket_balance(code)?;

        let security_issues = self.check_security(code);
        let complexity = python_complexity(code);
        let quality_issues = generic_quality_issues(code);

        let mut analysis = json!({
            "syntax_errors": [],
            "security_issues": security_issues,
            "quality_issues": quality_issues,
            "complexity_metrics": complexity,
            "total_lines": code.lines().count(),
            "analysis_status": "completed",
        });
        let score = quality_score(&analysis);
        analysis["quality_score"] = json!(score);
        Ok(analysis)
    }

    fn analyze_javascript(&self, code: &str) -> JsonValue {
        let security_issues = self.check_security(code);
        let mut quality_issues = generic_quality_issues(code);
        quality_issues.extend(javascript_quality_issues(code));

        let mut analysis = json!({
            "security_issues": security_issues,
            "quality_issues": quality_issues,
            "total_lines": code.lines().count(),
            "analysis_status": "completed",
        });
        let score = quality_score(&analysis);
        analysis["quality_score"] = json!(score);
        analysis
    }

    fn analyze_generic(&self, code: &str, language: &str) -> JsonValue {
        let security_issues = self.check_security(code);
        let score = (100i64 - security_issues.len() as i64 * 10).max(50);
        json!({
            "security_issues": security_issues,
            "quality_issues": [],
            "total_lines": code.lines().count(),
            "analysis_status": "limited",
            "message": format!("Limited analysis available for {language}"),
            "quality_score": score,
        })
    }
}

impl Default for CodeAnalyzerAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbalanced brackets make the structure scan meaningless.
fn check_bracket_balance(code: &str) -> Result<(), AgentFailure> {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    let mut previous = '\0';

    for ch in code.chars() {
        if let Some(quote) = in_string {
            if ch == quote && previous != '\\' {
                in_string = None;
            }
        } else {
            match ch {
                '"' | '\'' => in_string = Some(ch),
                '(' | '[' | '{' => stack.push(ch),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return Err(AgentFailure::Syntax {
                            message: format!("unbalanced '{ch}'"),
                        });
                    }
                }
                _ => {}
            }
        }
        previous = ch;
    }

    if let Some(open) = stack.pop() {
        return Err(AgentFailure::Syntax {
            message: format!("unclosed '{open}'"),
        });
    }
    Ok(())
}

/// Structure scan over leading keywords and indentation.
fn python_complexity(code: &str) -> JsonValue {
    let mut complexity: u32 = 1;
    let mut functions: u32 = 0;
    let mut classes: u32 = 0;
    let mut max_depth: usize = 0;
    // Indent levels of currently open blocks
    let mut block_indents: Vec<usize> = Vec::new();

    for line in code.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();

        while block_indents.last().is_some_and(|&open| indent <= open) {
            block_indents.pop();
        }

        let first_word = trimmed
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .next()
            .unwrap_or_default();

        match first_word {
            "if" | "elif" | "for" | "while" | "try" => complexity += 1,
            "def" => functions += 1,
            "class" => classes += 1,
            _ => {}
        }

        if trimmed.trim_end().ends_with(':') {
            block_indents.push(indent);
            max_depth = max_depth.max(block_indents.len());
        }
    }

    json!({
        "cyclomatic_complexity": complexity,
        "function_count": functions,
        "class_count": classes,
        "max_nesting_depth": max_depth,
    })
}

fn generic_quality_issues(code: &str) -> Vec<JsonValue> {
    let mut issues = Vec::new();
    let todo = RegexBuilder::new(r"(#|//)\s*(TODO|FIXME|XXX|HACK)")
        .case_insensitive(true)
        .build()
        .expect("valid todo pattern");

    for (index, line) in code.lines().enumerate() {
        let line_number = index + 1;
        if line.len() > 120 {
            issues.push(json!({
                "type": "quality",
                "severity": "low",
                "description": format!("Line too long ({} characters)", line.len()),
                "line": line_number,
                "recommendation": "Keep lines under 120 characters",
            }));
        }
        if todo.is_match(line) {
            issues.push(json!({
                "type": "quality",
                "severity": "info",
                "description": "Found TODO/FIXME comment",
                "line": line_number,
                "recommendation": "Consider addressing pending tasks",
            }));
        }
    }
    issues
}

fn javascript_quality_issues(code: &str) -> Vec<JsonValue> {
    let mut issues = Vec::new();
    let var_pattern = regex::Regex::new(r"\bvar\s+\w+").expect("valid var pattern");
    let console_pattern =
        regex::Regex::new(r"console\.(log|debug|info)").expect("valid console pattern");

    for found in var_pattern.find_iter(code) {
        let line = code[..found.start()].matches('\n').count() + 1;
        issues.push(json!({
            "type": "quality",
            "severity": "medium",
            "description": "Use of var instead of let/const",
            "line": line,
            "recommendation": "Use let or const instead of var",
        }));
    }
    for found in console_pattern.find_iter(code) {
        let line = code[..found.start()].matches('\n').count() + 1;
        issues.push(json!({
            "type": "quality",
            "severity": "low",
            "description": "Console statement found",
            "line": line,
            "recommendation": "Remove console statements from production code",
        }));
    }
    issues
}

/// Scoring: start at 100, deduct per finding, clamp to [0, 100].
fn quality_score(analysis: &JsonValue) -> i64 {
    let mut score: i64 = 100;

    if let Some(issues) = analysis["security_issues"].as_array() {
        for issue in issues {
            score -= match issue["severity"].as_str() {
                Some("critical") => 20,
                Some("high") => 10,
                Some("medium") => 5,
                _ => 2,
            };
        }
    }

    if let Some(issues) = analysis["quality_issues"].as_array() {
        for issue in issues {
            score -= match issue["severity"].as_str() {
                Some("high") => 5,
                Some("medium") => 3,
                _ => 1,
            };
        }
    }

    let cyclomatic = analysis["complexity_metrics"]["cyclomatic_complexity"]
        .as_i64()
        .unwrap_or(1);
    if cyclomatic > 20 {
        score -= 15;
    } else if cyclomatic > 10 {
        score -= 10;
    } else if cyclomatic > 5 {
        score -= 5;
    }

    score.clamp(0, 100)
}

fn summary_of(analysis: &JsonValue) -> String {
    let security = analysis["security_issues"].as_array().map_or(0, Vec::len);
    let quality = analysis["quality_issues"].as_array().map_or(0, Vec::len);
    let score = analysis["quality_score"].as_i64().unwrap_or(0);

    let level = if score >= 90 {
        "Excellent"
    } else if score >= 75 {
        "Good"
    } else if score >= 50 {
        "Fair"
    } else {
        "Poor"
    };

    let mut summary = format!("Code quality: {level} (Score: {score}/100). ");
    if security > 0 {
        summary.push_str(&format!("Found {security} security issue(s). "));
    } else {
        summary.push_str("No security issues detected. ");
    }
    if quality > 0 {
        summary.push_str(&format!("Found {quality} quality issue(s)."));
    } else {
        summary.push_str("No quality issues detected.");
    }
    summary
}

fn recommendations_of(analysis: &JsonValue) -> Vec<String> {
    let mut recommendations = Vec::new();

    let critical = analysis["security_issues"]
        .as_array()
        .is_some_and(|issues| issues.iter().any(|i| i["severity"] == "critical"));
    if critical {
        recommendations.push("Address critical security vulnerabilities immediately".to_string());
    }

    if analysis["complexity_metrics"]["cyclomatic_complexity"]
        .as_i64()
        .unwrap_or(1)
        > 10
    {
        recommendations
            .push("Consider refactoring complex functions to improve maintainability".to_string());
    }

    if analysis["total_lines"].as_u64().unwrap_or(0) > 1000 {
        recommendations.push("Consider breaking large files into smaller modules".to_string());
    }

    if analysis["quality_issues"].as_array().map_or(0, Vec::len) > 10 {
        recommendations.push("Clean up code quality issues to improve readability".to_string());
    }

    if recommendations.is_empty() {
        recommendations
            .push("Code looks good. Consider adding more comprehensive tests".to_string());
    }
    recommendations
}

#[async_trait]
impl Agent for CodeAnalyzerAgent {
    async fn run(
        &self,
        _config: &JsonValue,
        input: AgentInput,
        _cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();

        let code = input
            .get_str("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AgentFailure::InvalidInput {
                message: "No code provided for analysis".to_string(),
            })?
            .to_string();
        let language = input.get_str("language").unwrap_or("python").to_lowercase();

        let analysis = match language.as_str() {
            "python" => self.analyze_python(&code)?,
            "javascript" | "typescript" => self.analyze_javascript(&code),
            other => self.analyze_generic(&code, other),
        };

        let summary = summary_of(&analysis);
        let recommendations = recommendations_of(&analysis);

        let mut variables = Map::new();
        variables.insert(
            "code_quality_score".to_string(),
            analysis["quality_score"].clone(),
        );
        variables.insert(
            "security_issues_count".to_string(),
            json!(analysis["security_issues"].as_array().map_or(0, Vec::len)),
        );
        variables.insert("total_lines".to_string(), analysis["total_lines"].clone());

        let output = json!({
            "language": language,
            "timestamp": Utc::now().to_rfc3339(),
            "analysis": analysis,
            "summary": summary,
            "recommendations": recommendations,
        });

        Ok(AgentOutcome {
            output,
            variables,
            metadata: AgentMetadata::spanning(started_at),
        })
    }
}
