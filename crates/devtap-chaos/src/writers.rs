//! Response body mutation
//!
//! The proxy streams an upstream body through a small stack of gates built
//! from a [`ShapePlan`]. Ordering matters and is fixed by the plan's
//! consumers: the drop gate sits outermost (it must see bytes before anything
//! hides them), truncation next (it caps the stream), and drip pacing
//! innermost (it only paces what survives).
//!
//! The truncation gate keeps consuming after its cap and reports every chunk
//! as fully handled. The lie is deliberate: upstream copy loops finish
//! cleanly instead of surfacing short-write errors for an intentional
//! mutation.

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;

/// Pacing parameters for slow-drip delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DripPlan {
    /// Byte budget per millisecond
    pub bytes_per_ms: f64,
    /// Bytes written per paced chunk
    pub chunk_size: usize,
}

impl DripPlan {
    /// Sleep owed after writing `len` bytes
    pub fn delay_for(&self, len: usize) -> Duration {
        if self.bytes_per_ms <= 0.0 || len == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((len as f64 / self.bytes_per_ms).ceil() as u64)
    }
}

/// Everything the match set implies for the response body and headers
#[derive(Debug, Clone, Default)]
pub struct ShapePlan {
    /// Abort the connection before any body byte
    pub packet_loss: bool,
    /// Abort mid-body after this fraction of the expected size
    pub drop_after_percent: Option<f64>,
    /// Abort mid-body after this many bytes
    pub drop_after_bytes: Option<usize>,
    /// Cap the body at this fraction of the expected size
    pub truncate_percent: Option<f64>,
    /// Paced chunk delivery
    pub drip: Option<DripPlan>,
    /// Flip random bits in the body
    pub bit_flip: bool,
    /// Malform a JSON body
    pub corrupt_json: bool,
    /// End the stream with an error instead of a clean EOF
    pub chunked_abort: bool,
    /// Keep the advertised Content-Length while sending fewer bytes
    pub partial_body: bool,
    /// Inject padding response headers
    pub header_bomb: bool,
    /// Hold the connection open this long after the last byte
    pub slow_close: Option<Duration>,
}

impl ShapePlan {
    /// True when the plan changes nothing about the response
    pub fn is_noop(&self) -> bool {
        !self.packet_loss
            && self.drop_after_percent.is_none()
            && self.drop_after_bytes.is_none()
            && self.truncate_percent.is_none()
            && self.drip.is_none()
            && !self.bit_flip
            && !self.corrupt_json
            && !self.chunked_abort
            && !self.partial_body
            && !self.header_bomb
            && self.slow_close.is_none()
    }

    /// Byte cap for the body, when the plan truncates
    ///
    /// `partial_body` reuses the truncation machinery at half the body; the
    /// difference is that its caller leaves the Content-Length header alone.
    pub fn truncate_gate(&self, expected_size: usize) -> Option<TruncateGate> {
        let percent = self
            .truncate_percent
            .or(if self.partial_body { Some(0.5) } else { None })?;
        Some(TruncateGate::new(percent, expected_size))
    }

    /// Mid-body abort threshold, when the plan disconnects
    pub fn drop_gate(&self, expected_size: usize) -> Option<DropGate> {
        if let Some(bytes) = self.drop_after_bytes {
            return Some(DropGate::after_bytes(bytes));
        }
        self.drop_after_percent
            .map(|percent| DropGate::after_percent(percent, expected_size))
    }
}

/// Outcome of offering a chunk to the truncation gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admit {
    /// Put these bytes on the wire
    Forward(Bytes),
    /// Consume the chunk, emit nothing
    Swallow,
}

/// Byte-budget cap over the body stream
///
/// Forwards until `⌊percent × expected_size⌋` bytes have passed, clips the
/// crossing chunk, then swallows everything after while still reporting each
/// chunk as consumed.
#[derive(Debug)]
pub struct TruncateGate {
    budget: usize,
    emitted: usize,
    clipped: bool,
}

impl TruncateGate {
    /// Gate admitting `percent` of an `expected_size`-byte body
    pub fn new(percent: f64, expected_size: usize) -> Self {
        Self {
            budget: (percent * expected_size as f64).floor() as usize,
            emitted: 0,
            clipped: false,
        }
    }

    /// Offer one chunk; the chunk counts as consumed no matter the outcome
    pub fn admit(&mut self, chunk: Bytes) -> Admit {
        if self.emitted >= self.budget {
            self.clipped = true;
            return Admit::Swallow;
        }
        let remaining = self.budget - self.emitted;
        if chunk.len() <= remaining {
            self.emitted += chunk.len();
            Admit::Forward(chunk)
        } else {
            self.clipped = true;
            self.emitted = self.budget;
            Admit::Forward(chunk.slice(0..remaining))
        }
    }

    /// Whether any byte was cut
    pub fn clipped(&self) -> bool {
        self.clipped
    }

    /// Bytes put on the wire so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Outcome of offering a chunk to the drop gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropAdmit {
    /// Put these bytes on the wire
    Forward(Bytes),
    /// Flush these bytes, then terminate the connection
    Abort(Bytes),
}

/// Mid-body connection-drop threshold
#[derive(Debug)]
pub struct DropGate {
    threshold: usize,
    seen: usize,
}

impl DropGate {
    /// Trip after `percent` of an `expected_size`-byte body
    pub fn after_percent(percent: f64, expected_size: usize) -> Self {
        Self {
            threshold: (percent.clamp(0.0, 1.0) * expected_size as f64).floor() as usize,
            seen: 0,
        }
    }

    /// Trip after an absolute byte count
    pub fn after_bytes(bytes: usize) -> Self {
        Self {
            threshold: bytes,
            seen: 0,
        }
    }

    /// Offer one chunk; `Abort` carries the prefix to flush before closing
    pub fn admit(&mut self, chunk: Bytes) -> DropAdmit {
        if self.seen >= self.threshold {
            return DropAdmit::Abort(Bytes::new());
        }
        let remaining = self.threshold - self.seen;
        if chunk.len() <= remaining {
            self.seen += chunk.len();
            DropAdmit::Forward(chunk)
        } else {
            self.seen = self.threshold;
            DropAdmit::Abort(chunk.slice(0..remaining))
        }
    }
}

/// Split a buffered body into wire chunks of at most `chunk_size` bytes
pub fn split_chunks(body: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(body.len().div_ceil(chunk_size));
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + chunk_size).min(body.len());
        chunks.push(body.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Flip random bits in roughly 10% of the body's bytes
pub fn bit_flip<R: Rng>(data: &mut [u8], rng: &mut R) {
    if data.is_empty() {
        return;
    }
    let flips = ((data.len() as f64 * 0.1).max(1.0)) as usize;
    for _ in 0..flips {
        let index = rng.random_range(0..data.len());
        let bit = rng.random_range(0..8);
        data[index] ^= 1 << bit;
    }
}

/// Malform a JSON payload while keeping it superficially JSON-shaped
///
/// Prefers surgical damage (losing the closing delimiter, breaking a string
/// quote) and falls back to random byte corruption for non-JSON input.
pub fn corrupt_json<R: Rng>(data: &mut Vec<u8>, rng: &mut R) {
    if data.is_empty() {
        return;
    }

    let last_delimiter = data
        .iter()
        .rposition(|byte| matches!(byte, b'}' | b']'));
    if let Some(pos) = last_delimiter {
        data.truncate(pos);
        return;
    }

    if let Some(pos) = data.iter().position(|byte| *byte == b'"') {
        data[pos] = b'\'';
        return;
    }

    let index = rng.random_range(0..data.len());
    data[index] = rng.random();
}

/// Padding headers injected by a `header_bomb` rule
pub fn header_bomb<R: Rng>(rng: &mut R) -> Vec<(String, String)> {
    const HEADER_COUNT: usize = 48;
    const VALUE_LEN: usize = 96;

    (0..HEADER_COUNT)
        .map(|i| {
            let value: String = (0..VALUE_LEN)
                .map(|_| char::from(rng.sample(rand::distr::Alphanumeric)))
                .collect();
            (format!("x-chaos-pad-{i}"), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_truncate_half_of_sixteen_bytes() {
        let body = Bytes::from_static(b"0123456789ABCDEF");
        let mut gate = TruncateGate::new(0.5, body.len());

        // One oversized chunk is clipped to the budget.
        match gate.admit(body.clone()) {
            Admit::Forward(bytes) => assert_eq!(&bytes[..], b"01234567"),
            Admit::Swallow => panic!("first chunk must forward"),
        }
        // Everything after the cap is consumed without reaching the wire.
        assert_eq!(gate.admit(Bytes::from_static(b"tail")), Admit::Swallow);
        assert!(gate.clipped());
        assert_eq!(gate.emitted(), 8);
    }

    #[test]
    fn test_truncate_exact_chunks() {
        let mut gate = TruncateGate::new(0.5, 10);
        assert_eq!(
            gate.admit(Bytes::from_static(b"abc")),
            Admit::Forward(Bytes::from_static(b"abc"))
        );
        assert_eq!(
            gate.admit(Bytes::from_static(b"de")),
            Admit::Forward(Bytes::from_static(b"de"))
        );
        assert!(!gate.clipped());
        assert_eq!(gate.admit(Bytes::from_static(b"f")), Admit::Swallow);
        assert!(gate.clipped());
    }

    #[test]
    fn test_drop_gate_aborts_mid_chunk() {
        let mut gate = DropGate::after_percent(0.5, 16);
        match gate.admit(Bytes::from_static(b"0123456789ABCDEF")) {
            DropAdmit::Abort(flush) => assert_eq!(&flush[..], b"01234567"),
            DropAdmit::Forward(_) => panic!("gate must trip"),
        }
    }

    #[test]
    fn test_drop_gate_absolute_bytes() {
        let mut gate = DropGate::after_bytes(4);
        assert_eq!(
            gate.admit(Bytes::from_static(b"abcd")),
            DropAdmit::Forward(Bytes::from_static(b"abcd"))
        );
        assert_eq!(gate.admit(Bytes::from_static(b"e")), DropAdmit::Abort(Bytes::new()));
    }

    #[test]
    fn test_drip_delay_math() {
        let plan = DripPlan {
            bytes_per_ms: 2.0,
            chunk_size: 64,
        };
        assert_eq!(plan.delay_for(64), Duration::from_millis(32));
        assert_eq!(plan.delay_for(0), Duration::ZERO);

        let unset = DripPlan {
            bytes_per_ms: 0.0,
            chunk_size: 64,
        };
        assert_eq!(unset.delay_for(64), Duration::ZERO);
    }

    #[test]
    fn test_split_chunks() {
        let body = Bytes::from_static(b"0123456789");
        let chunks = split_chunks(&body, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..], b"0123");
        assert_eq!(&chunks[2][..], b"89");
    }

    #[test]
    fn test_bit_flip_changes_bytes() {
        let original = vec![0u8; 256];
        let mut data = original.clone();
        let mut rng = StdRng::seed_from_u64(5);
        bit_flip(&mut data, &mut rng);
        assert_ne!(data, original);
        assert_eq!(data.len(), original.len());
    }

    #[test]
    fn test_corrupt_json_breaks_parsing() {
        let mut data = br#"{"status":"ok","items":[1,2,3]}"#.to_vec();
        let mut rng = StdRng::seed_from_u64(5);
        corrupt_json(&mut data, &mut rng);
        assert!(serde_json::from_slice::<serde_json::Value>(&data).is_err());
    }

    #[test]
    fn test_header_bomb_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let headers = header_bomb(&mut rng);
        assert_eq!(headers.len(), 48);
        assert!(headers.iter().all(|(name, value)| {
            name.starts_with("x-chaos-pad-") && value.len() == 96
        }));
    }

    #[test]
    fn test_plan_gates() {
        let plan = ShapePlan {
            truncate_percent: Some(0.25),
            drop_after_bytes: Some(100),
            ..Default::default()
        };
        let truncate = plan.truncate_gate(400).expect("gate");
        assert_eq!(truncate.budget, 100);
        assert!(plan.drop_gate(400).is_some());

        let partial = ShapePlan {
            partial_body: true,
            ..Default::default()
        };
        assert!(partial.truncate_gate(10).is_some());
        assert!(ShapePlan::default().truncate_gate(10).is_none());
    }
}
