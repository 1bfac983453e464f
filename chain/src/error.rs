use chainwatch_types::BlockHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("header {hash} does not connect: parent {parent} is unknown")]
    UnknownParent { hash: BlockHash, parent: BlockHash },
}
