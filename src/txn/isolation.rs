use crate::driver::IsolationLevel;

/// Chooses the isolation level for a new transaction scope.
///
/// A nested scope never runs weaker than its parent: asking for less keeps
/// the parent's level. Otherwise the weakest supported level at least as
/// strong as the request wins. `None` when nothing qualifies.
pub fn negotiate(
    parent: Option<IsolationLevel>,
    desired: IsolationLevel,
    supports: impl Fn(IsolationLevel) -> bool,
) -> Option<IsolationLevel> {
    if let Some(parent) = parent {
        if desired <= parent {
            return Some(parent);
        }
    }
    IsolationLevel::ALL
        .into_iter()
        .filter(|level| *level != IsolationLevel::None && *level >= desired)
        .find(|level| supports(*level))
}
