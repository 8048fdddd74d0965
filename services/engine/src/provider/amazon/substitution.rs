//! Step payload placeholder substitution

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::superkey::{CreateRequest, StepKind, StepsCompleted, SubstitutionKind};

/// Replace every placeholder of `substitutions` in `payload`.
///
/// A placeholder whose value is not available (missing extra, bucket step not
/// yet run) is left untouched.
pub fn substitute(
    payload: &str,
    substitutions: &BTreeMap<String, String>,
    request: &CreateRequest,
    completed: &StepsCompleted,
) -> String {
    let mut payload = payload.to_string();

    for (placeholder, kind) in substitutions {
        let value = match SubstitutionKind::parse(kind) {
            Some(SubstitutionKind::Account) => {
                let account = request.extra.get("account").map(String::as_str);
                if account.is_none() {
                    warn!(placeholder = %placeholder, "No account in request extra, leaving placeholder");
                }
                account
            }
            Some(SubstitutionKind::BucketName) => {
                let bucket = completed.output(StepKind::Bucket.as_str(), "output");
                if bucket.is_none() {
                    warn!(
                        placeholder = %placeholder,
                        "Bucket referenced before the s3 step ran, leaving placeholder"
                    );
                }
                bucket
            }
            Some(SubstitutionKind::ExternalId) => {
                let external_id = request.extra.get("external_id").map(String::as_str);
                if external_id.is_none() {
                    debug!(placeholder = %placeholder, "No external id supplied");
                }
                external_id
            }
            None => {
                warn!(placeholder = %placeholder, kind = %kind, "Unknown substitution kind, ignoring");
                None
            }
        };

        if let Some(value) = value {
            payload = payload.replace(placeholder.as_str(), value);
        }
    }

    payload
}
