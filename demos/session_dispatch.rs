//! Producer threads feeding one dispatch thread, with a recovery cycle.
//!
//! Run with: cargo run --example session_dispatch

use capture_queue::{
    CaptureQueue, CaptureRequest, QueueConfig, QueueError, Recovery, SessionCaptureRequest,
    StreamBuffer, StreamBufferInfo,
};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PRODUCERS: u64 = 2;
const REQUESTS_PER_PRODUCER: u64 = 6;

fn capture(id: u64) -> SessionCaptureRequest {
    let output = StreamBuffer {
        stream_id: 1,
        handle: 0x1000 + id,
        fd: -1,
        ..StreamBuffer::default()
    };
    SessionCaptureRequest::new().with_request(
        CaptureRequest::new(id)
            .with_sync_id(id)
            .with_stream_buffer(StreamBufferInfo::new(id as u32, id).with_output(output)),
    )
}

/// Runs until its waits are cancelled.
fn spawn_dispatcher(queue: Arc<CaptureQueue>) -> JoinHandle<usize> {
    thread::spawn(move || {
        let mut dispatched = 0;
        while let Some(handle) = queue.dequeue_wait() {
            let request = &handle.requests()[0];
            println!(
                "dispatch slot {} -> request {} ({} output buffers)",
                handle.slot(),
                request.request_id,
                request.batched_output_count()
            );
            thread::sleep(Duration::from_millis(20));
            dispatched += 1;
        }
        dispatched
    })
}

fn main() -> capture_queue::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Session Dispatch Example ===\n");

    let queue = Arc::new(CaptureQueue::with_config(
        QueueConfig::new(4, 2).with_name("session-0"),
    )?);
    let dispatcher = spawn_dispatcher(queue.clone());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = queue.clone();
            thread::spawn(move || -> capture_queue::Result<()> {
                for i in 0..REQUESTS_PER_PRODUCER {
                    q.enqueue_wait(&capture(p * 100 + i), Recovery::Idle)?;
                }
                Ok(())
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked")?;
    }

    // Flush: everything submitted has been handed to the dispatcher.
    queue.wait_empty();
    println!("\nflushed {} requests\n", PRODUCERS * REQUESTS_PER_PRODUCER);

    // Recovery: stop the dispatcher, fill the queue and cancel a blocked producer.
    queue.cancel_wait();
    let dispatched = dispatcher.join().expect("dispatcher panicked");
    while queue.can_enqueue() {
        queue.enqueue(&capture(900 + queue.len() as u64))?;
    }
    queue.enable_wait();

    let q = queue.clone();
    let blocked = thread::spawn(move || q.enqueue_wait(&capture(999), Recovery::InProgress));
    thread::sleep(Duration::from_millis(50));
    queue.dump_state(&mut io::stdout(), 2).expect("stdout");
    queue.cancel_wait();

    match blocked.join().expect("producer panicked") {
        Err(err @ QueueError::Timeout) => println!("\nblocked producer: {err} (retryable)"),
        other => println!("\nblocked producer: {other:?}"),
    }

    // Re-arm, drain what was queued during recovery and retry.
    queue.enable_wait();
    let dispatcher = spawn_dispatcher(queue.clone());
    queue.enqueue_wait(&capture(999), Recovery::Idle)?;
    queue.wait_empty();
    queue.cancel_wait();
    let drained = dispatcher.join().expect("dispatcher panicked");

    println!("\ndispatched {dispatched} before recovery, {drained} after");
    println!("{:?}", queue.stats());
    Ok(())
}
