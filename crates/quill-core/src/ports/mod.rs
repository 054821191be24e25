//! Ports - 抽象化レイヤー
//!
//! writer がホストに要求する能力を trait として定義する。
//! - HandleFactory: 試行ごとに新しいストレージハンドルを作る
//! - EventSink: misuse などの通知を購読者へ流す

pub mod event_sink;
pub mod handle_factory;

pub use self::event_sink::EventSink;
pub use self::handle_factory::HandleFactory;
