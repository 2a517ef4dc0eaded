//! Partition routing for primitive names

use crate::error::{ElectionError, Result};
use crate::types::PrimitiveName;
use sha2::{Digest, Sha256};

/// Map a primitive to one of `partitions` connections.
///
/// The index depends only on the name, so every process routes the same
/// primitive to the same partition.
pub fn partition_index(name: &PrimitiveName, partitions: usize) -> Result<usize> {
    if partitions == 0 {
        return Err(ElectionError::InvalidConfiguration(format!(
            "cannot route {} across zero partitions",
            name
        )));
    }

    let digest = Sha256::digest(name.to_string().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(prefix);

    Ok((hash % partitions as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_partitions_rejected() {
        let name = PrimitiveName::new("default", "leader");
        assert!(matches!(
            partition_index(&name, 0),
            Err(ElectionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_index_is_deterministic_and_in_range() {
        for i in 0..100 {
            let name = PrimitiveName::new("default", format!("election-{}", i));
            let index = partition_index(&name, 7).unwrap();
            assert!(index < 7);
            assert_eq!(index, partition_index(&name, 7).unwrap());
        }
    }

    #[test]
    fn test_single_partition() {
        let name = PrimitiveName::new("ns", "anything");
        assert_eq!(partition_index(&name, 1).unwrap(), 0);
    }

    #[test]
    fn test_names_spread_across_partitions() {
        let mut seen = [false; 4];
        for i in 0..64 {
            let name = PrimitiveName::new("default", format!("e{}", i));
            seen[partition_index(&name, 4).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
