#![cfg(loom)]

use capture_queue::{CaptureQueue, CaptureRequest, Recovery, SessionCaptureRequest};
use loom::sync::Arc;
use loom::thread;

fn record(id: u64) -> SessionCaptureRequest {
    SessionCaptureRequest::new().with_request(CaptureRequest::new(id))
}

#[test]
fn loom_spsc_blocking() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(1, 1).unwrap());
        let q_send = queue.clone();

        let producer = thread::spawn(move || {
            for i in 0..2 {
                q_send.enqueue_wait(&record(i), Recovery::Idle).unwrap();
            }
        });

        let mut received = vec![];
        for _ in 0..2 {
            let handle = queue.dequeue_wait().unwrap();
            received.push(handle.first_request_id().unwrap());
        }

        producer.join().unwrap();
        assert_eq!(received, vec![0, 1]);
        assert!(queue.is_empty());
    });
}

#[test]
fn loom_mpsc() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(2, 1).unwrap());
        let mut handles = vec![];

        // Two producers
        for i in 0..2 {
            let q = queue.clone();
            handles.push(thread::spawn(move || {
                q.enqueue_wait(&record(i), Recovery::Idle).unwrap();
            }));
        }

        let mut received = vec![];
        for _ in 0..2 {
            let handle = queue.dequeue_wait().unwrap();
            received.push(handle.first_request_id().unwrap());
        }

        for h in handles {
            h.join().unwrap();
        }
        received.sort_unstable();
        assert_eq!(received, vec![0, 1]);
    });
}

#[test]
fn loom_cancel_unblocks_dequeue_wait() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(1, 1).unwrap());
        let q = queue.clone();

        let consumer = thread::spawn(move || q.dequeue_wait().map(|h| h.slot()));

        queue.cancel_wait();
        assert_eq!(consumer.join().unwrap(), None);
    });
}

#[test]
fn loom_cancel_unblocks_enqueue_wait() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(1, 1).unwrap());
        queue.enqueue(&record(0)).unwrap();
        let q = queue.clone();

        let producer = thread::spawn(move || q.enqueue_wait(&record(1), Recovery::InProgress));

        queue.cancel_wait();
        assert!(producer.join().unwrap().is_err());
        assert_eq!(queue.len(), 1);
    });
}

#[test]
fn loom_release_wakes_enqueue_wait() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(1, 1).unwrap());
        queue.enqueue(&record(0)).unwrap();
        let q = queue.clone();

        let producer = thread::spawn(move || {
            q.enqueue_wait(&record(1), Recovery::Idle).unwrap();
        });

        let handle = queue.dequeue().unwrap().unwrap();
        queue.release(handle).unwrap();
        producer.join().unwrap();

        let handle = queue.dequeue().unwrap().unwrap();
        assert_eq!(handle.first_request_id(), Some(1));
    });
}

#[test]
fn loom_wait_empty_vs_dequeue() {
    loom::model(|| {
        let queue = Arc::new(CaptureQueue::create(2, 1).unwrap());
        queue.enqueue(&record(0)).unwrap();
        let q = queue.clone();

        let flusher = thread::spawn(move || {
            q.wait_empty();
        });

        let handle = queue.dequeue().unwrap().unwrap();
        flusher.join().unwrap();
        drop(handle);
        assert!(queue.is_empty());
    });
}
