//! 延迟任务
//!
//! 在帧图声明阶段把 CPU 计算（剔除、排序等）丢到工作线程池，
//! 节点回调中再通过 [`DeferredTask::wait`] 取回结果。

use crossbeam_channel::{Receiver, TryRecvError};

/// 在工作线程上运行的任务结果
pub struct DeferredTask<T> {
    name: String,
    result_receiver: Receiver<T>,
}

impl<T: Send + 'static> DeferredTask<T> {
    pub(crate) fn spawn<F>(pool: &rayon::ThreadPool, name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let (result_sender, result_receiver) = crossbeam_channel::bounded(1);

        let task_name = name.clone();
        pool.spawn(move || {
            let _span = tracy_client::span!("DeferredTask::run");
            log::trace!("deferred task `{}` started", task_name);
            let _ = result_sender.send(task());
        });

        Self { name, result_receiver }
    }
}

impl<T> DeferredTask<T> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 结果是否已经就绪
    #[inline]
    pub fn is_ready(&self) -> bool {
        !self.result_receiver.is_empty()
    }

    /// 阻塞直到任务完成
    ///
    /// 在工作线程上等待时会先执行池中其它待处理的任务，避免所有线程都在等待而死锁。
    ///
    /// # 返回
    /// 任务 panic 时返回 None
    pub fn wait(self) -> Option<T> {
        loop {
            match self.result_receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    if !matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                        if let Ok(value) = self.result_receiver.recv() {
                            return Some(value);
                        }
                        break;
                    }
                }
            }
        }

        log::error!("deferred task `{}` did not produce a result", self.name);
        None
    }
}
