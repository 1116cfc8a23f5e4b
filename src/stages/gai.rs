//! Prefer IPv4 in getaddrinfo on dual-stack hosts.

use std::fs;
use std::io;

use super::{Stage, StageContext};
use crate::error::{Result, SweeperError};

const GAI_CONF: &str = "/etc/gai.conf";
pub const IPV4_PRECEDENCE: &str = "precedence ::ffff:0:0/96  100";

fn is_precedence_rule(words: &str) -> bool {
    words.split_whitespace().eq(IPV4_PRECEDENCE.split_whitespace())
}

/// Make the IPv4 precedence rule active. `None` when it already is.
///
/// A commented-out rule is uncommented in place; otherwise the rule is
/// appended.
pub fn ensure_precedence(current: &str) -> Option<String> {
    let lines: Vec<&str> = current.lines().collect();

    if lines.iter().any(|l| is_precedence_rule(l)) {
        return None;
    }

    let mut out = String::with_capacity(current.len() + IPV4_PRECEDENCE.len() + 1);
    let mut uncommented = false;
    for line in &lines {
        let commented = line
            .trim_start()
            .strip_prefix('#')
            .is_some_and(is_precedence_rule);
        if commented && !uncommented {
            out.push_str(IPV4_PRECEDENCE);
            uncommented = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !uncommented {
        out.push_str(IPV4_PRECEDENCE);
        out.push('\n');
    }
    Some(out)
}

pub struct GaiStage;

impl Stage for GaiStage {
    fn id(&self) -> &'static str {
        "gai"
    }

    fn title(&self) -> &'static str {
        "IPv4 address precedence"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let path = ctx.paths.resolve(GAI_CONF);
        let current = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(SweeperError::io(&path, e)),
        };

        match ensure_precedence(&current) {
            None => ctx.console().info("IPv4 precedence already configured"),
            Some(updated) => {
                ctx.exec.backup_file(&path);
                if ctx.exec.write_file(&path, &updated).is_done() {
                    ctx.console().success("IPv4 addresses now preferred");
                }
            }
        }
        Ok(())
    }
}
