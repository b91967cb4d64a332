use crate::{convert_error, error::MusicError, too_large};
use nom::{
    branch::alt,
    bytes::complete::{tag, take},
    error::{context, ParseError, VerboseError},
    multi::count,
    number::complete::{le_i16, le_u32},
};

/// Playback rate of the S-DSP.
pub const DSP_SAMPLE_RATE: u32 = 32000;

/// Mono 16-bit PCM with an optional forward loop.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Wav {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
    pub loop_start: Option<u32>,
}

#[inline]
fn align2(v: usize) -> usize {
    (v + 1) & !1
}

fn parse_riff_header<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
    name: &[u8; 4],
) -> nom::IResult<&'a [u8], (), E> {
    let (data, _) = tag(b"RIFF")(data)?;
    let (data, riffsize) = le_u32(data)?;
    let data = data.get(..riffsize as usize).ok_or_else(|| too_large(data))?;
    let (data, _) = tag(name)(data)?;
    Ok((data, ()))
}

fn parse_riff_chunks<'a, E: ParseError<&'a [u8]>>(
    mut data: &'a [u8],
    mut f: impl FnMut(&'a [u8], &'a [u8]) -> nom::IResult<&'a [u8], (), E>,
) -> nom::IResult<&'a [u8], (), E> {
    while data.len() >= 8 {
        let (d, chunk_name) = take(4usize)(data)?;
        let (d, chunk_size) = le_u32(d)?;
        let (d, chunk) = take(chunk_size as usize)(d)?;
        f(chunk_name, chunk)?;
        // the pad byte of an odd-sized final chunk is often missing
        data = d.get(align2(chunk_size as usize) - chunk_size as usize..).unwrap_or_default();
    }
    Ok((data, ()))
}

impl Wav {
    pub fn read<'a, E: ParseError<&'a [u8]> + nom::error::ContextError<&'a [u8]>>(
        data: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, E> {
        let mut samplesize = 0u16;
        let mut sample_rate = 0;
        let mut samples = None;
        let mut loop_start = None;
        let (data, _) = context("RIFF header", |d| parse_riff_header(d, b"WAVE"))(data)?;
        let (data, _) = parse_riff_chunks(data, |chunk_name, chunk| {
            match chunk_name {
                b"fmt " => {
                    let (chunk, _) = context("PCM format", tag(1u16.to_le_bytes()))(chunk)?;
                    let (chunk, _) = context("mono", tag(1u16.to_le_bytes()))(chunk)?;
                    let (chunk, sr) = le_u32(chunk)?;
                    sample_rate = sr;
                    let (chunk, _datarate) = le_u32(chunk)?;
                    let (chunk, ss) = context(
                        "sample size",
                        alt((tag(1u16.to_le_bytes()), tag(2u16.to_le_bytes()))),
                    )(chunk)?;
                    samplesize = u16::from(ss[0]);
                    context("bits per sample", tag((samplesize * 8).to_le_bytes()))(chunk)?;
                }
                b"smpl" => {
                    let (chunk, _) = take(28usize)(chunk)?;
                    let (chunk, loops) = le_u32(chunk)?;
                    let (chunk, _extra) = le_u32(chunk)?;
                    if loops > 0 {
                        let (chunk, _id) = le_u32(chunk)?;
                        let (chunk, _type) = le_u32(chunk)?;
                        let (_, start) = le_u32(chunk)?;
                        loop_start = Some(start);
                    }
                }
                b"data" => match samplesize {
                    1 => {
                        // 8-bit WAV data is unsigned
                        samples = Some(
                            chunk
                                .iter()
                                .map(|s| ((*s as i16) - 128) << 8)
                                .collect::<Vec<_>>(),
                        );
                    }
                    2 => samples = Some(count(le_i16, chunk.len() / 2)(chunk)?.1),
                    _ => return Err(crate::nom_fail(chunk)),
                },
                _ => {}
            }
            Ok((&[], ()))
        })?;
        let Some(samples) = samples else {
            return Err(crate::nom_fail(data));
        };
        Ok((
            data,
            Self {
                sample_rate,
                samples,
                loop_start,
            },
        ))
    }
    pub fn read_file(data: &[u8]) -> Result<Self, MusicError> {
        Self::read::<VerboseError<_>>(data)
            .map(|(_, wav)| wav)
            .map_err(|e| {
                MusicError::malformed(format!(
                    "{}\nWAV must be uncompressed 16-bit mono or 8-bit mono.",
                    convert_error(data, e)
                ))
            })
    }
    pub fn write(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        let data_size = self.samples.len() * 2;
        let mut riff_size = 4 + (8 + 16) + (8 + data_size);
        if self.loop_start.is_some() {
            riff_size += 8 + 60;
        }
        w.write_all(b"RIFF")?;
        w.write_all(&(riff_size as u32).to_le_bytes())?;
        w.write_all(b"WAVE")?;

        w.write_all(b"fmt ")?;
        w.write_all(&16u32.to_le_bytes())?; // fmt size
        w.write_all(&1u16.to_le_bytes())?; // WAVE_FORMAT_PCM
        w.write_all(&1u16.to_le_bytes())?; // nchannels
        w.write_all(&self.sample_rate.to_le_bytes())?;
        w.write_all(&(2 * self.sample_rate).to_le_bytes())?; // data rate
        w.write_all(&2u16.to_le_bytes())?; // sample size
        w.write_all(&16u16.to_le_bytes())?; // bits per sample

        if let Some(start) = self.loop_start {
            w.write_all(b"smpl")?;
            w.write_all(&60u32.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?; // manufacturer
            w.write_all(&0u32.to_le_bytes())?; // product
            w.write_all(&(1_000_000_000 / self.sample_rate.max(1)).to_le_bytes())?;
            w.write_all(&60u32.to_le_bytes())?; // note
            w.write_all(&0u32.to_le_bytes())?; // pitchfrac
            w.write_all(&0u32.to_le_bytes())?; // format
            w.write_all(&0u32.to_le_bytes())?; // offset
            w.write_all(&1u32.to_le_bytes())?; // nloops
            w.write_all(&0u32.to_le_bytes())?; // extra

            w.write_all(&0u32.to_le_bytes())?; // loop id
            w.write_all(&0u32.to_le_bytes())?; // loop type
            w.write_all(&start.to_le_bytes())?;
            let end = (self.samples.len() as u32).saturating_sub(1).max(start);
            w.write_all(&end.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?; // frac
            w.write_all(&0u32.to_le_bytes())?; // infinite
        }

        w.write_all(b"data")?;
        w.write_all(&(data_size as u32).to_le_bytes())?;
        for s in &self.samples {
            w.write_all(&s.to_le_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn round_trip() {
        let wav = Wav {
            sample_rate: DSP_SAMPLE_RATE,
            samples: vec![0, 1000, -1000, i16::MAX, i16::MIN],
            loop_start: Some(2),
        };
        let mut out = Vec::new();
        wav.write(&mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()) as usize, out.len() - 8);
        assert_eq!(Wav::read_file(&out).unwrap(), wav);

        let plain = Wav {
            loop_start: None,
            ..wav
        };
        let mut out = Vec::new();
        plain.write(&mut out).unwrap();
        assert_eq!(Wav::read_file(&out).unwrap(), plain);
    }

    #[test]
    fn eight_bit() {
        let data = hex!(
            "52494646 28000000 57415645"
            "666d7420 10000000 0100 0100 401f0000 401f0000 0100 0800"
            "64617461 03000000 80 ff 00 00"
        );
        let wav = Wav::read_file(&data).unwrap();
        assert_eq!(wav.sample_rate, 8000);
        assert_eq!(wav.samples, vec![0, 127 << 8, -128 << 8]);
    }

    #[test]
    fn rejects_stereo() {
        let data = hex!(
            "52494646 24000000 57415645"
            "666d7420 10000000 0100 0200 401f0000 803e0000 0200 1000"
            "64617461 00000000"
        );
        let err = Wav::read_file(&data).unwrap_err();
        assert!(err.to_string().contains("mono"), "{err}");
        assert!(Wav::read_file(b"RIFX").is_err());
    }
}
