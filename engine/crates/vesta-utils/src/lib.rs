//! 跨线程共享的基础设施
//!
//! [`handle_table::HandleTable`] 用稳定的 `u32` 地址代替指针，
//! 是 update 线程、frame 线程和 worker 之间唯一共享的状态。

pub mod handle_table;

#[doc(hidden)]
pub use log;
#[doc(hidden)]
pub use tracy_client;

/// tracy profiling zone
///
/// 只有 tracy client 已经启动时才会真正创建 span，否则为空操作。
/// 需要保存返回值：`let _span = vesta_utils::profile_span!("FrameBackend::tick");`
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}

/// 前置条件检查
///
/// debug 下直接 panic，release 下只打印 error 日志，不会破坏内存。
/// 宏的值为条件本身，调用方据此提前返回。
///
/// ```ignore
/// if !vesta_utils::precondition!(table.is_alive(addr), "unknown address {addr}") {
///     return None;
/// }
/// ```
#[macro_export]
macro_rules! precondition {
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            #[cfg(debug_assertions)]
            panic!($($arg)+);
            #[cfg(not(debug_assertions))]
            $crate::log::error!($($arg)+);
        }
        ok
    }};
}
