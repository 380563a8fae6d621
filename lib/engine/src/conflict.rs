//! Resource-tag conflict detection (§4.3.4 "no currently executing flows
//! have a resource flag conflict").

/// True iff any tag in `candidate` also appears in `active`. Used to reject
/// admission of a pending flow whose resource tags overlap an already
/// active flow's.
#[must_use]
pub fn any_tags(active: &[String], candidate: &[String]) -> bool {
    candidate.iter().any(|t| active.contains(t))
}
