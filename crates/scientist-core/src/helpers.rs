//! Convenience adapters for run outcomes

use crate::error::ExperimentError;
use std::any::Any;
use std::fmt::Debug;

/// Assert that a run produced a boolean
///
/// Errors pass through untouched.
///
/// # Errors
/// - The run's own error
/// - `ExperimentError::BadResultType` if the value is not a `bool`
pub fn bool_result<T>(outcome: Result<T, ExperimentError>) -> Result<bool, ExperimentError>
where
    T: Any + Debug,
{
    let value = outcome?;
    match (&value as &dyn Any).downcast_ref::<bool>() {
        Some(b) => Ok(*b),
        None => Err(ExperimentError::BadResultType {
            value: format!("{value:?}"),
            type_name: std::any::type_name::<T>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BehaviorError;

    #[test]
    fn bool_value_passes() {
        assert!(bool_result(Ok::<_, ExperimentError>(true)).unwrap());
        assert!(!bool_result(Ok::<_, ExperimentError>(false)).unwrap());
    }

    #[test]
    fn non_bool_value_is_type_error() {
        let err = bool_result(Ok::<_, ExperimentError>(1_i32)).unwrap_err();
        assert_eq!(err.to_string(), "[scientist] bad result type: 1 (i32)");
    }

    #[test]
    fn error_passes_through() {
        let err = bool_result::<bool>(Err(BehaviorError::failed(anyhow::anyhow!("nope")).into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
