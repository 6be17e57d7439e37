//! Matching URI patterns against the merged listing of a run.

use cryocat_core::UriPattern;

use crate::error::StoreResult;
use crate::root::{Entity, Run};

/// Entities of `run` selected by `pattern`, ordered by identity.
///
/// A literal pattern is resolved directly instead of listing the run. Zero
/// matches is an empty result, not an error.
pub fn find_matches(run: &Run, pattern: &UriPattern) -> StoreResult<Vec<Entity>> {
    if let UriPattern::Literal(id) = pattern {
        let location = run.resolve(id)?;
        if !location.presence.is_present() {
            return Ok(Vec::new());
        }
        return Ok(vec![Entity {
            id: id.clone(),
            presence: location.presence,
            multilabel: location.multilabel,
        }]);
    }

    let matches: Vec<Entity> = run
        .list(pattern.kind())?
        .into_iter()
        .filter(|entity| pattern.matches(&entity.id))
        .collect();

    tracing::debug!(
        run = %run.name(),
        pattern = %pattern,
        matches = matches.len(),
        "Matched pattern",
    );
    Ok(matches)
}
