//! App - アプリケーションが触る Bus の表層
//!
//! - **BusBuilder**: 登録・ワイヤリング・起動時検証
//! - **Bus**: send/publish と、1 プロセス分のバックグラウンドジョブ
//! - **SendOptions**: メッセージごとの priority, delay, headers

pub mod builder;
pub mod bus;
pub mod options;

pub use self::builder::{BuildError, BusBuilder};
pub use self::bus::Bus;
pub use self::options::SendOptions;
