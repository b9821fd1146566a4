use std::collections::VecDeque;

/// 队列已满，消息原样退回给调用者
#[derive(Debug)]
pub struct Full<T>(pub T);

/// 有界 FIFO 延迟队列
/// 只能从队尾进、队头出；队头消息仍然无法处理时可以放回队头，不会改变相对顺序
#[derive(Debug)]
pub struct DeferredQueue<T> {
    queue: VecDeque<T>,
    capacity: usize,
}

impl<T> DeferredQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn enqueue(&mut self, msg: T) -> Result<(), Full<T>> {
        if self.queue.len() >= self.capacity {
            return Err(Full(msg));
        }
        self.queue.push_back(msg);
        Ok(())
    }

    pub fn drain_next(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    /// 放回刚取出的队头消息
    pub fn requeue_front(&mut self, msg: T) {
        self.queue.push_front(msg)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
