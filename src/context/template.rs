// src/context/template.rs

//! Command/query templates with a fixed set of `{{ token }}` placeholders.
//!
//! Templates are parsed once, when the dependency graph is built, so an
//! unknown token or an unterminated `{{` is a configuration error rather than
//! a surprise at dispatch time.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::context::RunContext;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder regex is valid")
});

/// The tokens a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateToken {
    /// Logical date, `YYYY-MM-DD`.
    Ds,
    /// Logical date, `YYYYMMDD`.
    DsNodash,
    PrevDs,
    NextDs,
    RunId,
    PipelineId,
}

impl TemplateToken {
    pub const ALL: [TemplateToken; 6] = [
        TemplateToken::Ds,
        TemplateToken::DsNodash,
        TemplateToken::PrevDs,
        TemplateToken::NextDs,
        TemplateToken::RunId,
        TemplateToken::PipelineId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateToken::Ds => "ds",
            TemplateToken::DsNodash => "ds_nodash",
            TemplateToken::PrevDs => "prev_ds",
            TemplateToken::NextDs => "next_ds",
            TemplateToken::RunId => "run_id",
            TemplateToken::PipelineId => "pipeline_id",
        }
    }
}

impl fmt::Display for TemplateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateToken::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = TemplateToken::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown template token '{s}' (known: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(TemplateToken),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()])?;
            segments.push(Segment::Token(name.as_str().parse()?));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tokens referenced by this template, in order of appearance.
    pub fn tokens(&self) -> impl Iterator<Item = TemplateToken> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(t) => Some(*t),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the rendered text depends on the logical date.
    pub fn is_date_keyed(&self) -> bool {
        self.tokens().any(|t| {
            matches!(
                t,
                TemplateToken::Ds
                    | TemplateToken::DsNodash
                    | TemplateToken::PrevDs
                    | TemplateToken::NextDs
            )
        })
    }

    pub fn render(&self, ctx: &RunContext) -> String {
        let mut out = String::with_capacity(self.source.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Token(t) => out.push_str(&ctx.value_of(*t)),
            }
        }
        out
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), String> {
    if let Some(pos) = text.find("{{") {
        return Err(format!(
            "unterminated or malformed placeholder near '{}'",
            text[pos..].chars().take(24).collect::<String>()
        ));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}
