use pcascade_core::codec::ExactCodec;

/// Lossless run-length codec for fixed-width integers.
///
/// The payload is a sequence of `[LEB128 run length][element bytes]` pairs.
/// Works on raw element bytes, so signedness does not matter.
pub struct RunLength;

fn push_varint(out: &mut Vec<u8>, mut n: u64) {
    while n >= 0x80 {
        out.push((n as u8) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}

fn read_varint(buf: &[u8], pos: &mut usize) -> anyhow::Result<u64> {
    let mut n = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| anyhow::anyhow!("run length truncated at byte {}", *pos))?;
        *pos += 1;
        n |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(n);
        }
    }
    anyhow::bail!("run length overflows 64 bits at byte {}", *pos)
}

impl ExactCodec for RunLength {
    fn name(&self) -> &'static str {
        "rle"
    }

    fn compress(&self, element_size: usize, _signed: bool, src: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(element_size > 0, "zero element size");
        let mut out = Vec::new();
        let mut elements = src.chunks_exact(element_size).peekable();
        while let Some(first) = elements.next() {
            let mut run = 1u64;
            while elements.next_if_eq(&first).is_some() {
                run += 1;
            }
            push_varint(&mut out, run);
            out.extend_from_slice(first);
        }
        Ok(out)
    }

    fn decompress(
        &self,
        element_size: usize,
        _signed: bool,
        payload: &[u8],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(element_size > 0, "zero element size");
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            let run = read_varint(payload, &mut pos)?;
            anyhow::ensure!(run > 0, "zero-length run at byte {}", pos);
            let run_bytes = usize::try_from(run)
                .ok()
                .and_then(|r| r.checked_mul(element_size))
                .filter(|&n| n <= max_len - out.len())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "run of {} elements at byte {} overflows the {}-byte output",
                        run,
                        pos,
                        max_len
                    )
                })?;
            let element = payload
                .get(pos..pos + element_size)
                .ok_or_else(|| anyhow::anyhow!("element truncated at byte {}", pos))?;
            pos += element_size;
            out.reserve(run_bytes);
            for _ in 0..run {
                out.extend_from_slice(element);
            }
        }
        Ok(out)
    }
}
