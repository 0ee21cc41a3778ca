//! Effective commit resolution for references.

use crate::errors::{EngineError, Result};
use crate::shard::TagPolicy;
use git2::{ObjectType, Oid, Reference, ReferenceType, Repository};

/// The commit a reference ultimately designates.
///
/// A symbolic reference is followed one hop; its target must be a direct
/// reference. Tag objects are peeled to their commit under
/// [`TagPolicy::Dereference`]. A zero hash, a missing object, a failed
/// dereference or a non-commit target all yield
/// [`EngineError::UnresolvableReference`], which callers skip.
pub fn effective_commit(repo: &Repository, reference: &Reference<'_>, policy: TagPolicy) -> Result<Oid> {
    let name = String::from_utf8_lossy(reference.name_bytes());
    let unresolvable = || EngineError::UnresolvableReference {
        name: name.to_string(),
    };

    let target = match reference.kind() {
        Some(ReferenceType::Symbolic) => {
            let target_name = reference.symbolic_target().ok_or_else(unresolvable)?;
            let direct = repo.find_reference(target_name).map_err(|_| unresolvable())?;
            if direct.kind() != Some(ReferenceType::Direct) {
                return Err(unresolvable());
            }
            direct.target()
        }
        _ => reference.target(),
    }
    .ok_or_else(unresolvable)?;

    if target.is_zero() {
        return Err(unresolvable());
    }

    let object = repo.find_object(target, None).map_err(|_| unresolvable())?;
    match object.kind() {
        Some(ObjectType::Commit) => Ok(target),
        Some(ObjectType::Tag) if policy == TagPolicy::Dereference => object
            .peel_to_commit()
            .map(|commit| commit.id())
            .map_err(|_| unresolvable()),
        _ => Err(unresolvable()),
    }
}

/// Look a reference up by exact name and resolve it.
pub fn resolve_name(repo: &Repository, name: &str, policy: TagPolicy) -> Result<Oid> {
    let reference = repo
        .find_reference(name)
        .map_err(|_| EngineError::UnresolvableReference { name: name.to_string() })?;
    effective_commit(repo, &reference, policy)
}
