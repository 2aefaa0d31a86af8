//! Convenience macros over `pinstep-core`.

pub use pinstep_core;

#[doc(hidden)]
pub mod __private {
    pub use futures::FutureExt;
    pub use pinstep_core::join_all;
}

/// Waits for futures of different concrete types that share an output type,
/// returning their outputs as a `Vec` in argument order.
///
/// Each argument is boxed so the children can be driven uniformly by
/// [`join_all`](pinstep_core::join_all).
///
/// ```
/// use pinstep_core::{run, yield_now};
/// use pinstep_macros::join_all;
///
/// let words = run(async {
///     join_all!(
///         async { "fast" },
///         async {
///             yield_now().await;
///             "slow"
///         },
///         std::future::ready("ready"),
///     )
///     .await
/// });
/// assert_eq!(words, ["fast", "slow", "ready"]);
/// ```
#[macro_export]
macro_rules! join_all {
    ($($future:expr),+ $(,)?) => {
        $crate::__private::join_all(::std::vec![
            $($crate::__private::FutureExt::boxed_local($future)),+
        ])
    };
}
