pub mod log_stream;
pub mod rpc;
pub mod token_account;
pub mod wallet;

pub use log_stream::SolanaLogStream;
pub use rpc::SolanaClient;
pub use wallet::{read_keypair_file, KeystoreCustody, WalletError};
