//! Outbound frame scheduling.
//!
//! Two tiers. The *control* buffer holds frames that are committed in call
//! order and never wait for flow control: preface, SETTINGS and their ACKs,
//! complete HEADERS/CONTINUATION sequences, PING, RST_STREAM, WINDOW_UPDATE,
//! GOAWAY. The *data* tier holds per-stream FIFO queues of DATA (and
//! trailing-HEADERS) items, drained round-robin under the session and stream
//! send windows with MAX_FRAME_SIZE fragmentation.
//!
//! Control always flushes ahead of data, which is what lets a PING ACK or
//! SETTINGS ACK overtake a backlog of queued DATA.

use std::collections::{HashMap, VecDeque};

use crate::error::H2Error;
use crate::flowcontrol::FlowControl;
use crate::frame::{self, Frame};
use crate::stream::Stream;

/// Default cap on queued DATA bytes across all streams (1 MiB).
pub const DEFAULT_SEND_QUEUE_LIMIT: usize = 1 << 20;

/// One queued outbound item for a stream.
enum PendingItem {
    Data {
        data: Vec<u8>,
        offset: usize,
        end_stream: bool,
    },
    /// Trailing header block; always carries END_STREAM (RFC 7540
    /// Section 8.1). Not flow-controlled, but must serialize after the
    /// stream's queued DATA.
    Trailers { block: Vec<u8> },
}

pub(crate) struct OutputScheduler {
    control: Vec<u8>,
    queues: HashMap<u32, VecDeque<PendingItem>>,
    /// Streams with queued items, in round-robin order.
    ring: VecDeque<u32>,
    queued_bytes: usize,
    limit: usize,
}

impl OutputScheduler {
    pub fn new() -> Self {
        Self {
            control: Vec::new(),
            queues: HashMap::new(),
            ring: VecDeque::new(),
            queued_bytes: 0,
            limit: DEFAULT_SEND_QUEUE_LIMIT,
        }
    }

    pub fn set_queue_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// The control buffer; frames encoded here keep their commit order.
    pub fn control(&mut self) -> &mut Vec<u8> {
        &mut self.control
    }

    /// Queue DATA for a stream. Fails when the queued-byte cap is reached;
    /// callers retry after the queue drains.
    pub fn queue_data(
        &mut self,
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        if self.queued_bytes + data.len() > self.limit {
            return Err(H2Error::SendQueueFull);
        }
        self.queued_bytes += data.len();
        self.enqueue(
            stream_id,
            PendingItem::Data {
                data,
                offset: 0,
                end_stream,
            },
        );
        Ok(())
    }

    /// Queue a trailing header block behind the stream's pending DATA.
    pub fn queue_trailers(&mut self, stream_id: u32, block: Vec<u8>) -> Result<(), H2Error> {
        if self.queued_bytes + block.len() > self.limit {
            return Err(H2Error::SendQueueFull);
        }
        self.queued_bytes += block.len();
        self.enqueue(stream_id, PendingItem::Trailers { block });
        Ok(())
    }

    fn enqueue(&mut self, stream_id: u32, item: PendingItem) {
        let queue = self.queues.entry(stream_id).or_default();
        if queue.is_empty() {
            self.ring.push_back(stream_id);
        }
        queue.push_back(item);
    }

    /// Drop everything queued for a stream (reset or cancellation).
    pub fn drop_stream(&mut self, stream_id: u32) {
        if let Some(queue) = self.queues.remove(&stream_id) {
            for item in queue {
                self.queued_bytes -= match item {
                    PendingItem::Data { data, offset, .. } => data.len() - offset,
                    PendingItem::Trailers { block } => block.len(),
                };
            }
        }
        self.ring.retain(|&id| id != stream_id);
    }

    /// Total bytes waiting in the data tier.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn has_pending(&self) -> bool {
        !self.control.is_empty() || self.queued_bytes > 0
    }

    /// Move the control buffer and as much queued data as the windows allow
    /// into one output buffer. Streams whose final END_STREAM frame was
    /// emitted are returned so the session can complete their transitions.
    pub fn take(
        &mut self,
        conn_window: &mut FlowControl,
        streams: &mut HashMap<u32, Stream>,
        max_frame_size: u32,
    ) -> (Vec<u8>, Vec<u32>) {
        let mut out = std::mem::take(&mut self.control);
        let mut finished = Vec::new();

        // Round-robin over streams with queued items. A full lap without
        // progress means every remaining stream is window-blocked.
        let mut stalled = 0usize;
        while stalled < self.ring.len() {
            let Some(stream_id) = self.ring.pop_front() else {
                break;
            };

            let Some(stream) = streams.get_mut(&stream_id) else {
                // Stream vanished (reset); discard its queue.
                self.drop_stream(stream_id);
                stalled = 0;
                continue;
            };

            let queue = self.queues.get_mut(&stream_id).expect("ring/queue sync");
            let mut progressed = false;

            while let Some(item) = queue.front_mut() {
                match item {
                    PendingItem::Trailers { block } => {
                        let block = std::mem::take(block);
                        self.queued_bytes -= block.len();
                        queue.pop_front();
                        frame::encode_headers_frames(
                            &mut out,
                            stream_id,
                            &block,
                            true,
                            max_frame_size,
                        );
                        stream.send_end_stream();
                        finished.push(stream_id);
                        progressed = true;
                    }
                    PendingItem::Data {
                        data,
                        offset,
                        end_stream,
                    } => {
                        let remaining = data.len() - *offset;
                        if remaining == 0 {
                            // Bare end-of-stream marker.
                            let end = *end_stream;
                            queue.pop_front();
                            if end {
                                Frame::Data {
                                    stream_id,
                                    payload: Vec::new(),
                                    end_stream: true,
                                }
                                .encode(&mut out);
                                stream.send_end_stream();
                                finished.push(stream_id);
                            }
                            progressed = true;
                            continue;
                        }

                        let budget = conn_window.window().min(stream.send_window.window());
                        if budget <= 0 {
                            break;
                        }
                        let take = remaining
                            .min(budget as usize)
                            .min(max_frame_size as usize);

                        let chunk = data[*offset..*offset + take].to_vec();
                        *offset += take;
                        self.queued_bytes -= take;
                        // Window accounting cannot fail: take <= budget.
                        conn_window.consume(take as u32).expect("conn window");
                        stream
                            .send_window
                            .consume(take as u32)
                            .expect("stream window");

                        let is_last = *offset == data.len();
                        let end = *end_stream && is_last;
                        Frame::Data {
                            stream_id,
                            payload: chunk,
                            end_stream: end,
                        }
                        .encode(&mut out);

                        if is_last {
                            queue.pop_front();
                            if end {
                                stream.send_end_stream();
                                finished.push(stream_id);
                            }
                        }
                        progressed = true;
                        // One DATA frame per stream per lap keeps the
                        // round-robin fair.
                        break;
                    }
                }
            }

            if self.queues.get(&stream_id).is_none_or(|q| q.is_empty()) {
                self.queues.remove(&stream_id);
                // Stream leaves the ring.
            } else {
                self.ring.push_back(stream_id);
            }

            if progressed {
                stalled = 0;
            } else {
                stalled += 1;
            }
        }

        (out, finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_frame;

    fn decode_all(buf: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = buf;
        while let Some((frame, consumed)) = decode_frame(rest, 1 << 24).unwrap() {
            rest = &rest[consumed..];
            frames.push(frame);
        }
        frames
    }

    fn open_stream(streams: &mut HashMap<u32, Stream>, id: u32, send_window: i64) {
        let mut s = Stream::new(id, 65_535, send_window);
        s.send_headers(false);
        streams.insert(id, s);
    }

    #[test]
    fn control_precedes_data() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::default();
        open_stream(&mut streams, 1, 65_535);

        sched.queue_data(1, b"body".to_vec(), false).unwrap();
        Frame::Ping {
            ack: true,
            opaque_data: [0; 8],
        }
        .encode(sched.control());

        let (out, _) = sched.take(&mut conn, &mut streams, 16_384);
        let frames = decode_all(&out);
        assert!(matches!(frames[0], Frame::Ping { .. }));
        assert!(matches!(frames[1], Frame::Data { .. }));
    }

    #[test]
    fn data_clamped_to_stream_window() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::default();
        open_stream(&mut streams, 1, 10);

        sched.queue_data(1, vec![0u8; 25], true).unwrap();
        let (out, finished) = sched.take(&mut conn, &mut streams, 16_384);
        let frames = decode_all(&out);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => {
                assert_eq!(payload.len(), 10);
                assert!(!end_stream);
            }
            _ => panic!("expected Data"),
        }
        assert!(finished.is_empty());
        assert_eq!(sched.queued_bytes(), 15);

        // Window opens: remainder drains with END_STREAM.
        streams.get_mut(&1).unwrap().send_window.increase(15).unwrap();
        let (out, finished) = sched.take(&mut conn, &mut streams, 16_384);
        let frames = decode_all(&out);
        match &frames[0] {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => {
                assert_eq!(payload.len(), 15);
                assert!(end_stream);
            }
            _ => panic!("expected Data"),
        }
        assert_eq!(finished, vec![1]);
        assert_eq!(sched.queued_bytes(), 0);
    }

    #[test]
    fn data_fragments_at_max_frame_size() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::new(100_000);
        open_stream(&mut streams, 1, 100_000);

        sched.queue_data(1, vec![0u8; 40_000], true).unwrap();
        let (out, _) = sched.take(&mut conn, &mut streams, 16_384);
        let frames = decode_all(&out);
        assert_eq!(frames.len(), 3); // 16384 + 16384 + 7232
        let sizes: Vec<usize> = frames
            .iter()
            .map(|f| match f {
                Frame::Data { payload, .. } => payload.len(),
                _ => panic!("expected Data"),
            })
            .collect();
        assert_eq!(sizes, vec![16_384, 16_384, 7_232]);
    }

    #[test]
    fn round_robin_across_streams() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::new(1 << 24);
        open_stream(&mut streams, 1, 1 << 24);
        open_stream(&mut streams, 3, 1 << 24);

        sched.queue_data(1, vec![1u8; 20_000], false).unwrap();
        sched.queue_data(3, vec![3u8; 20_000], false).unwrap();

        let (out, _) = sched.take(&mut conn, &mut streams, 16_384);
        let order: Vec<u32> = decode_all(&out)
            .iter()
            .map(|f| match f {
                Frame::Data { stream_id, .. } => *stream_id,
                _ => panic!("expected Data"),
            })
            .collect();
        // Both streams make progress each lap, neither starves the other.
        assert_eq!(order, vec![1, 3, 1, 3]);
    }

    #[test]
    fn conn_window_blocks_all_streams() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::new(0);
        open_stream(&mut streams, 1, 65_535);

        sched.queue_data(1, b"stuck".to_vec(), false).unwrap();
        let (out, _) = sched.take(&mut conn, &mut streams, 16_384);
        assert!(out.is_empty());
        assert_eq!(sched.queued_bytes(), 5);
    }

    #[test]
    fn trailers_follow_data_in_order() {
        let mut sched = OutputScheduler::new();
        let mut streams = HashMap::new();
        let mut conn = FlowControl::default();
        open_stream(&mut streams, 1, 65_535);

        sched.queue_data(1, b"payload".to_vec(), false).unwrap();
        sched.queue_trailers(1, vec![0x82]).unwrap();
        let (out, finished) = sched.take(&mut conn, &mut streams, 16_384);
        let frames = decode_all(&out);
        assert!(matches!(frames[0], Frame::Data { .. }));
        match &frames[1] {
            Frame::Headers {
                end_stream,
                end_headers,
                ..
            } => {
                assert!(end_stream);
                assert!(end_headers);
            }
            _ => panic!("expected trailer Headers"),
        }
        assert_eq!(finished, vec![1]);
    }

    #[test]
    fn queue_cap_enforced() {
        let mut sched = OutputScheduler::new();
        sched.set_queue_limit(10);
        assert!(sched.queue_data(1, vec![0u8; 8], false).is_ok());
        assert_eq!(
            sched.queue_data(1, vec![0u8; 8], false),
            Err(H2Error::SendQueueFull)
        );
    }

    #[test]
    fn drop_stream_releases_bytes() {
        let mut sched = OutputScheduler::new();
        sched.queue_data(1, vec![0u8; 100], false).unwrap();
        sched.drop_stream(1);
        assert_eq!(sched.queued_bytes(), 0);
        assert!(!sched.has_pending());
    }
}
