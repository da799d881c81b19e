//! Run provenance: experiment identifiers and config fingerprints.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fresh identifier for one simulation run.
pub fn generate_experiment_id() -> Uuid {
    Uuid::new_v4()
}

/// SHA-256 fingerprint of a serializable configuration, hex encoded.
///
/// Two runs with the same hash ran under the same configuration, which is
/// what makes result files comparable after the fact.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String> {
    let json = serde_json::to_string(config)?;
    let digest = Sha256::digest(json.as_bytes());
    Ok(format!("{:x}", digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        pool: Vec<String>,
        cost: f64,
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Sample {
            pool: vec!["510300".to_string()],
            cost: 0.0015,
        };
        let b = Sample {
            pool: vec!["510300".to_string()],
            cost: 0.0015,
        };
        let c = Sample {
            pool: vec!["510300".to_string()],
            cost: 0.002,
        };

        let ha = compute_config_hash(&a).unwrap();
        assert_eq!(ha, compute_config_hash(&b).unwrap());
        assert_ne!(ha, compute_config_hash(&c).unwrap());
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn test_experiment_ids_unique() {
        assert_ne!(generate_experiment_id(), generate_experiment_id());
    }
}
