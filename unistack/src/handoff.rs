//! Work handed to an interface from other cores.
//!
//! Each core owns its interfaces exclusively. Other cores never touch them, they post a task on
//! a bounded lock-free queue and the owning core runs it during its next poll.
use alloc::boxed::Box;
use alloc::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::iface::Interface;

/// A unit of work for the core owning an interface.
pub type Task<D> = Box<dyn FnOnce(&mut Interface<D>) + Send>;

/// Posts tasks, may be moved to and cloned on any core.
pub struct Sender<D> {
    queue: Arc<ArrayQueue<Task<D>>>,
}

/// Runs tasks, held by the interface.
pub struct Receiver<D> {
    queue: Arc<ArrayQueue<Task<D>>>,
}

/// Create a queue holding at most `capacity` tasks.
pub fn channel<D>(capacity: usize) -> (Sender<D>, Receiver<D>) {
    let queue = Arc::new(ArrayQueue::new(capacity));
    (Sender { queue: Arc::clone(&queue) }, Receiver { queue })
}

impl<D> Sender<D> {
    /// Post a task, returning it when the queue is full.
    pub fn send(&self, task: impl FnOnce(&mut Interface<D>) + Send + 'static) -> Result<(), Task<D>> {
        self.queue.push(Box::new(task))
    }

    /// Tasks waiting to be run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl<D> Clone for Sender<D> {
    fn clone(&self) -> Self {
        Sender { queue: Arc::clone(&self.queue) }
    }
}

impl<D> Receiver<D> {
    /// Run up to `max` queued tasks.
    pub fn run(&self, iface: &mut Interface<D>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match self.queue.pop() {
                Some(task) => task(iface),
                None => break,
            }
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::iface::tests::interface_pair;

    #[test]
    fn tasks_from_other_threads() {
        let (mut left, _right) = interface_pair();
        let sender = left.handoff(4);

        let remote = sender.clone();
        thread::spawn(move || {
            for port in 80..83 {
                let posted = remote.send(move |iface| {
                    iface.tcp_mut().bind(port).map(|_| ()).unwrap();
                });
                assert!(posted.is_ok());
            }
        }).join().unwrap();
        assert_eq!(sender.pending(), 3);

        left.run_handoff();
        assert_eq!(sender.pending(), 0);
        assert!(left.tcp_mut().listener(81).is_some());
    }

    #[test]
    fn bounded() {
        let (sender, _receiver) = channel::<crate::nic::Pipe>(1);
        assert!(sender.send(|_| ()).is_ok());
        assert!(sender.send(|_| ()).is_err());
    }
}
