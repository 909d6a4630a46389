// src/input.rs

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::core::models::DomainTarget;
use crate::errors::FatalError;

/// Reads the domain list at `path` (`-` for stdin).
pub fn read_targets(path: &Path) -> Result<Vec<DomainTarget>, FatalError> {
    let unreadable = |source| FatalError::UnreadableInput {
        path: path.to_path_buf(),
        source,
    };

    let targets = if path == Path::new("-") {
        parse_targets(io::stdin().lock()).map_err(unreadable)?
    } else {
        let file = File::open(path).map_err(unreadable)?;
        parse_targets(BufReader::new(file)).map_err(unreadable)?
    };

    if targets.is_empty() {
        return Err(FatalError::EmptyInput(path.to_path_buf()));
    }
    info!(path = %path.display(), count = targets.len(), "Loaded domain list.");
    Ok(targets)
}

/// One target per line; blank lines and `#` comments are skipped.
pub fn parse_targets<R: BufRead>(reader: R) -> io::Result<Vec<DomainTarget>> {
    let mut targets = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match DomainTarget::parse(trimmed) {
            Some(target) => targets.push(target),
            None => debug!(line = trimmed, "Skipping line without a host."),
        }
    }
    Ok(targets)
}
