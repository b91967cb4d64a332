use bitflags::bitflags;

pub const BLOCK_SIZE: usize = 9;
pub const SAMPLES_PER_BLOCK: usize = 16;
const MAX_SHIFT: u8 = 12;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct BrrFlags: u8 {
        const END = 0x01;
        const LOOP = 0x02;
    }
}

/// First byte of a BRR block: `rrrr ff l e`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BrrHeader {
    pub shift: u8,
    pub filter: u8,
    pub flags: BrrFlags,
}

impl BrrHeader {
    #[inline]
    pub fn from_byte(b: u8) -> Self {
        Self {
            shift: b >> 4,
            filter: (b >> 2) & 0x03,
            flags: BrrFlags::from_bits_truncate(b),
        }
    }
    #[inline]
    pub fn to_byte(self) -> u8 {
        (self.shift << 4) | ((self.filter & 0x03) << 2) | self.flags.bits()
    }
}

#[inline]
fn predict(filter: u8, p1: i32, p2: i32) -> i32 {
    match filter {
        1 => p1 + ((-p1) >> 4),
        2 => ((p1 * 61) >> 5) - ((p2 * 15) >> 4),
        3 => ((p1 * 115) >> 6) - ((p2 * 13) >> 4),
        _ => 0,
    }
}

/// Expands a signed nibble through the filter, exactly as the DSP does.
#[inline]
fn reconstruct(nibble: i32, shift: u8, predicted: i32) -> i32 {
    let scaled = if shift <= MAX_SHIFT {
        nibble << shift
    } else if nibble < 0 {
        -2048
    } else {
        0
    };
    (scaled + predicted).clamp(i16::MIN as i32, i16::MAX as i32)
}

#[inline]
fn sign_extend(n: u8) -> i32 {
    ((n << 4) as i8 >> 4) as i32
}

/// Decodes BRR blocks until the block carrying the end flag. A trailing
/// partial block is ignored. `loop_start` receives the sample index of the
/// first loop-flagged block, if any.
pub fn decode_brr(data: &[u8], loop_start: &mut Option<usize>) -> Vec<i16> {
    let mut out = Vec::with_capacity(data.len() / BLOCK_SIZE * SAMPLES_PER_BLOCK);
    let (mut p1, mut p2) = (0i32, 0i32);
    *loop_start = None;
    for (i, block) in data.chunks_exact(BLOCK_SIZE).enumerate() {
        let header = BrrHeader::from_byte(block[0]);
        if header.flags.contains(BrrFlags::LOOP) && loop_start.is_none() {
            *loop_start = Some(i * SAMPLES_PER_BLOCK);
        }
        for &b in &block[1..] {
            for n in [b >> 4, b & 0x0F] {
                let s = reconstruct(sign_extend(n), header.shift, predict(header.filter, p1, p2));
                out.push(s as i16);
                p2 = p1;
                p1 = s;
            }
        }
        if header.flags.contains(BrrFlags::END) {
            break;
        }
    }
    out
}

/// Returns the encoded nibbles, the squared error and the predictor state
/// after the block.
fn encode_block(
    samples: &[i16],
    shift: u8,
    filter: u8,
    mut p1: i32,
    mut p2: i32,
) -> ([u8; SAMPLES_PER_BLOCK], u64, i32, i32) {
    let mut nibbles = [0u8; SAMPLES_PER_BLOCK];
    let mut error = 0u64;
    let half = (1i32 << shift) >> 1;
    for (n, &s) in nibbles.iter_mut().zip(samples) {
        let predicted = predict(filter, p1, p2);
        let diff = s as i32 - predicted;
        let q = ((diff + half) >> shift).clamp(-8, 7);
        let r = reconstruct(q, shift, predicted);
        let e = (s as i32 - r) as i64;
        error += (e * e) as u64;
        *n = (q & 0x0F) as u8;
        p2 = p1;
        p1 = r;
    }
    (nibbles, error, p1, p2)
}

/// Encodes 16-bit PCM, padding with silence to a whole number of blocks.
pub fn encode_brr(pcm: &[i16], loop_start: Option<usize>) -> Vec<u8> {
    let blocks = pcm.len().div_ceil(SAMPLES_PER_BLOCK);
    let loop_block = loop_start.map(|s| (s / SAMPLES_PER_BLOCK).min(blocks.saturating_sub(1)));
    let mut out = Vec::with_capacity(blocks * BLOCK_SIZE);
    let (mut p1, mut p2) = (0i32, 0i32);
    let mut buf = [0i16; SAMPLES_PER_BLOCK];
    for i in 0..blocks {
        let chunk = &pcm[i * SAMPLES_PER_BLOCK..pcm.len().min((i + 1) * SAMPLES_PER_BLOCK)];
        buf.fill(0);
        buf[..chunk.len()].copy_from_slice(chunk);

        let mut best: Option<(u8, u8, [u8; SAMPLES_PER_BLOCK], u64, i32, i32)> = None;
        for shift in 0..=MAX_SHIFT {
            for filter in 0..4 {
                let (nibbles, err, n1, n2) = encode_block(&buf, shift, filter, p1, p2);
                if best.as_ref().map_or(true, |b| err < b.3) {
                    best = Some((shift, filter, nibbles, err, n1, n2));
                }
            }
        }
        let Some((shift, filter, nibbles, _, n1, n2)) = best else {
            break;
        };
        (p1, p2) = (n1, n2);

        let mut flags = BrrFlags::empty();
        if loop_block.is_some_and(|l| i >= l) {
            flags |= BrrFlags::LOOP;
        }
        if i + 1 == blocks {
            flags |= BrrFlags::END;
        }
        out.push(
            BrrHeader {
                shift,
                filter,
                flags,
            }
            .to_byte(),
        );
        out.extend(nibbles.chunks_exact(2).map(|n| (n[0] << 4) | n[1]));
    }
    out
}

/// Length in bytes of the BRR stream at the start of `data`, up to and
/// including the block with the end flag.
pub fn brr_length(data: &[u8]) -> Option<usize> {
    data.chunks_exact(BLOCK_SIZE)
        .position(|b| BrrHeader::from_byte(b[0]).flags.contains(BrrFlags::END))
        .map(|i| (i + 1) * BLOCK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sine(len: usize, period: f64, amp: f64) -> Vec<i16> {
        (0..len)
            .map(|i| ((i as f64 * std::f64::consts::TAU / period).sin() * amp) as i16)
            .collect()
    }

    #[test]
    fn header_bits() {
        let h = BrrHeader::from_byte(0xB7);
        assert_eq!(h.shift, 11);
        assert_eq!(h.filter, 1);
        assert_eq!(h.flags, BrrFlags::END | BrrFlags::LOOP);
        assert_eq!(h.to_byte(), 0xB7);
    }

    #[test]
    fn decode_raw_block() {
        let data = hex!("01 17 8F 00 00 00 00 00 00");
        let mut lp = None;
        let pcm = decode_brr(&data, &mut lp);
        assert_eq!(pcm.len(), 16);
        assert_eq!(&pcm[..4], &[1, 7, -8, -1]);
        assert_eq!(lp, None);
    }

    #[test]
    fn decode_stops_at_end_and_drops_partial() {
        let data = hex!(
            "00 11 11 11 11 11 11 11 11"
            "03 00 00 00 00 00 00 00 00"
            "00 77 77 77 77 77 77 77 77"
        );
        let mut lp = None;
        assert_eq!(decode_brr(&data, &mut lp).len(), 32);
        assert_eq!(lp, Some(16));

        let mut lp = None;
        assert_eq!(decode_brr(&data[..9 + 5], &mut lp).len(), 16);
        assert!(decode_brr(&data[..8], &mut lp).is_empty());
    }

    #[test]
    fn round_trip() {
        let pcm = sine(100, 64.0, 4000.0);
        let brr = encode_brr(&pcm, None);
        assert_eq!(brr.len() % BLOCK_SIZE, 0);
        assert_eq!(brr.len(), 7 * BLOCK_SIZE);
        assert_eq!(brr_length(&brr), Some(brr.len()));

        let mut lp = Some(3);
        let out = decode_brr(&brr, &mut lp);
        assert_eq!(lp, None);
        assert_eq!(out.len(), 112);
        let total: i64 = pcm
            .iter()
            .zip(&out)
            .map(|(a, b)| (*a as i64 - *b as i64).abs())
            .sum();
        assert!(total / (pcm.len() as i64) < 256, "mean error {}", total / 100);
        assert!(out[100..].iter().all(|s| s.abs() < 1024));
    }

    #[test]
    fn loop_flags() {
        let pcm = sine(64, 32.0, 1000.0);
        let brr = encode_brr(&pcm, Some(20));
        let flags: Vec<_> = brr
            .chunks_exact(BLOCK_SIZE)
            .map(|b| BrrHeader::from_byte(b[0]).flags)
            .collect();
        assert_eq!(
            flags,
            vec![
                BrrFlags::empty(),
                BrrFlags::LOOP,
                BrrFlags::LOOP,
                BrrFlags::LOOP | BrrFlags::END
            ]
        );
        let mut lp = None;
        decode_brr(&brr, &mut lp);
        assert_eq!(lp, Some(16));
    }

    #[test]
    fn silence() {
        let brr = encode_brr(&[0; 16], None);
        assert_eq!(brr, hex!("01 00 00 00 00 00 00 00 00").to_vec());
        assert!(encode_brr(&[], None).is_empty());
    }
}
