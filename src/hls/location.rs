//! printf-style segment location templates (`segment%05d.ts`).
//!
//! Supports a single integer directive, `%d` or `%0Nd`, and the `%%` escape.

use crate::error::{Result, SinkError};

/// A validated segment file name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocation {
    prefix: String,
    suffix: String,
    width: usize,
}

impl SegmentLocation {
    /// Parse a template, requiring exactly one integer directive.
    pub fn parse(template: &str) -> Result<Self> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut width = None;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if width.is_some() { &mut suffix } else { &mut prefix };

            if c != '%' {
                out.push(c);
                continue;
            }

            if chars.peek() == Some(&'%') {
                chars.next();
                out.push('%');
                continue;
            }

            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }

            if chars.next() != Some('d') {
                return Err(SinkError::InvalidConfig(format!(
                    "Unsupported directive in segment location '{}'",
                    template
                )));
            }
            if width.is_some() {
                return Err(SinkError::InvalidConfig(format!(
                    "Segment location '{}' has more than one index directive",
                    template
                )));
            }

            // "%5d" pads with spaces in printf; only zero padding makes sense for file names
            if !digits.is_empty() && !digits.starts_with('0') {
                return Err(SinkError::InvalidConfig(format!(
                    "Segment location '{}' must zero-pad its index (use %0Nd)",
                    template
                )));
            }

            width = Some(digits.parse().unwrap_or(0));
        }

        match width {
            Some(width) => Ok(Self {
                prefix,
                suffix,
                width,
            }),
            None => Err(SinkError::InvalidConfig(format!(
                "Segment location '{}' has no index directive (%d)",
                template
            ))),
        }
    }

    /// Render the file name for a sequence index.
    pub fn format(&self, index: u32) -> String {
        format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        )
    }
}
