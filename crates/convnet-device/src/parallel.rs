use crate::error::DeviceError;

/// Controls how the work-items of a kernel dispatch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool to run work-items in parallel.
    ///
    /// This maximizes parallelism but may have overhead for tiny layers.
    #[default]
    ParallelElements,

    /// Run every kernel on a dedicated single worker.
    ///
    /// Useful for debugging or when comparing against a reference result.
    Serial,

    /// Run on a private thread pool with `n` threads.
    ///
    /// The pool is built once, when the command queue is created.
    Fixed(usize),
}

impl ExecutionStrategy {
    /// Builds the private pool required by the strategy, if any.
    ///
    /// Returns `None` for [`ExecutionStrategy::ParallelElements`], which runs on the
    /// global pool.
    pub(crate) fn build_pool(self) -> Result<Option<rayon::ThreadPool>, DeviceError> {
        let num_threads = match self {
            ExecutionStrategy::ParallelElements => return Ok(None),
            ExecutionStrategy::Serial => 1,
            ExecutionStrategy::Fixed(0) => return Err(DeviceError::InvalidThreadCount(0)),
            ExecutionStrategy::Fixed(n) => n,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("convnet-device-{i}"))
            .build()
            .map_err(|e| DeviceError::PoolBuildError(e.to_string()))?;

        Ok(Some(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_pool_has_no_private_pool() -> Result<(), DeviceError> {
        assert!(ExecutionStrategy::ParallelElements.build_pool()?.is_none());
        Ok(())
    }

    #[test]
    fn test_serial_builds_single_thread() -> Result<(), DeviceError> {
        let pool = ExecutionStrategy::Serial.build_pool()?;
        assert_eq!(pool.map(|p| p.current_num_threads()), Some(1));
        Ok(())
    }

    #[test]
    fn test_fixed_success() -> Result<(), DeviceError> {
        let pool = ExecutionStrategy::Fixed(3).build_pool()?;
        assert_eq!(pool.map(|p| p.current_num_threads()), Some(3));
        Ok(())
    }

    #[test]
    fn test_fixed_error() {
        let res = ExecutionStrategy::Fixed(0).build_pool();
        assert!(matches!(res, Err(DeviceError::InvalidThreadCount(0))));
    }
}
