use crate::error::TriggerError;

/// How a run was started. Scheduled runs come from the platform scheduler;
/// manual runs must present the configured secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    Scheduled,
    Manual,
}

pub const UNAUTHORIZED_STATUS: u16 = 401;

/// Checks an `Authorization` value (`Bearer <secret>` or the bare secret) for a manual run.
pub fn authorize(
    invocation: Invocation,
    expected_secret: Option<&str>,
    authorization: Option<&str>,
) -> Result<(), TriggerError> {
    if invocation == Invocation::Scheduled {
        return Ok(());
    }
    let expected = expected_secret
        .filter(|s| !s.is_empty())
        .ok_or(TriggerError::SecretNotConfigured)?;
    let provided = authorization
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(TriggerError::MissingAuthorization)?;
    let provided = provided.strip_prefix("Bearer ").unwrap_or(provided).trim();
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(TriggerError::InvalidAuthorization)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
