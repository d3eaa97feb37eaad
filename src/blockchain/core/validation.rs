use crate::blockchain::core::chain::Block;
use crate::error::ChainError;
use crate::hashing::GENESIS_PREVIOUS_HASH;

/// Checks a full chain: genesis sentinel, index sequence, hash integrity and
/// `previous_hash` linkage of every block.
pub fn validate_chain(blocks: &[Block]) -> Result<(), ChainError> {
    let genesis = blocks
        .first()
        .ok_or_else(|| ChainError::InvalidBlock("Chain is empty".to_string()))?;

    if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(ChainError::InvalidBlock(
            "First block is not a genesis block".to_string(),
        ));
    }

    for (position, block) in blocks.iter().enumerate() {
        if block.index != position as u64 {
            return Err(ChainError::InvalidBlock(format!(
                "Block at position {} has index {}",
                position, block.index
            )));
        }

        if block.compute_hash()? != block.hash {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} hash does not match its contents",
                block.index
            )));
        }

        if position > 0 && block.previous_hash != blocks[position - 1].hash {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} does not link to block {}",
                block.index,
                position - 1
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{BlockTemplate, Chain};
    use crate::pow::{CancelFlag, ProofOfWork};

    fn chain_of(len: usize) -> Vec<Block> {
        let mut chain = Chain::new().unwrap();
        let pow = ProofOfWork::new(1).unwrap();
        while chain.len() < len {
            let template = BlockTemplate::next(chain.tip(), Vec::new());
            let solution = pow.search(&template, &CancelFlag::new()).unwrap();
            chain.append(template.seal(solution)).unwrap();
        }
        chain.blocks().to_vec()
    }

    #[test]
    fn test_valid_chain() {
        assert!(validate_chain(&chain_of(4)).is_ok());
    }

    #[test]
    fn test_broken_link_detected() {
        let mut blocks = chain_of(3);
        blocks[2].previous_hash = blocks[0].hash.clone();
        assert!(validate_chain(&blocks).is_err());
    }

    #[test]
    fn test_tampered_hash_detected() {
        let mut blocks = chain_of(3);
        blocks[1].timestamp += 1;
        assert!(validate_chain(&blocks).is_err());
        assert!(validate_chain(&[]).is_err());
    }
}
