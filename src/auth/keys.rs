//! Signing key selection
//!
//! Picks the key that may verify a token from its issuer's cached key set.
//! A miss on a plausible rotation gets at most one forced refresh of the
//! issuer record; a second miss is final. The cache throttles those
//! refreshes per issuer, so a stream of unknown key ids costs at most one
//! fetch per `min_refresh_interval`.

use super::cache::{IssuerRecord, IssuerTrustCache};
use super::jwks::{is_symmetric, SigningKey};
use super::token::UnverifiedToken;
use super::AuthError;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a key could not be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMiss {
    /// The algorithm is never acceptable for this issuer; refreshing cannot help
    Refused,
    /// No matching key in this record; a newer record might have one
    Absent,
}

/// Select the key for `token` from `record`, without any I/O
///
/// With a `kid`, only the key with exactly that id is considered. Without
/// one, the single key able to verify the algorithm is used.
pub fn select_key<'a>(
    token: &UnverifiedToken,
    record: &'a IssuerRecord,
) -> Result<&'a SigningKey, KeyMiss> {
    let alg = token.algorithm();
    if is_symmetric(alg) || !record.metadata().allows(alg) {
        return Err(KeyMiss::Refused);
    }

    record
        .keys()
        .find(token.key_id(), alg)
        .ok_or(KeyMiss::Absent)
}

/// A selected key together with the record it came from
///
/// The record is kept so that claim validation runs against the same trust
/// material that verified the signature.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub record: Arc<IssuerRecord>,
    pub key: SigningKey,
}

/// Key selector bound to the trust cache
#[derive(Clone)]
pub struct KeySelector {
    cache: Arc<IssuerTrustCache>,
}

impl KeySelector {
    pub fn new(cache: Arc<IssuerTrustCache>) -> Self {
        Self { cache }
    }

    /// Resolve the verification key, refreshing the issuer at most once
    pub async fn resolve_key(
        &self,
        token: &UnverifiedToken,
        record: Arc<IssuerRecord>,
    ) -> Result<ResolvedKey, AuthError> {
        let not_found = || {
            AuthError::KeyNotFound(format!(
                "kid={} alg={:?}",
                token.key_id().unwrap_or("-"),
                token.algorithm()
            ))
        };

        match select_key(token, &record) {
            Ok(key) => {
                let key = key.clone();
                return Ok(ResolvedKey { record, key });
            }
            Err(KeyMiss::Refused) => {
                debug!(issuer = %record.issuer(), alg = ?token.algorithm(), "Algorithm not accepted for issuer");
                return Err(not_found());
            }
            Err(KeyMiss::Absent) => {}
        }

        debug!(
            issuer = %record.issuer(),
            kid = ?token.key_id(),
            "Signing key not cached, forcing issuer refresh"
        );
        metrics::record_key_refresh();

        let refreshed = match self.cache.force_refresh(&record).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(issuer = %record.issuer(), error = %e, "Forced issuer refresh failed");
                return Err(not_found());
            }
        };

        select_key(token, &refreshed)
            .map(SigningKey::clone)
            .map(|key| ResolvedKey {
                record: Arc::clone(&refreshed),
                key,
            })
            .map_err(|_| not_found())
    }
}
