use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DecodeError, DecodeResult};

const MAGIC: &[u8; 4] = b"LGEO";
const VERSION: u16 = 1;

const FLAG_NORMALS: u16 = 1 << 0;
const FLAG_UVS: u16 = 1 << 1;

/// Decoded triangle mesh.
///
/// Attribute arrays are interleaved-free: positions are `3 * vertex_count`
/// floats, normals likewise, uvs `2 * vertex_count`. Indices are triangle
/// lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

impl Geometry {
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Approximate resident size in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        ((self.positions.len() + self.normals.len() + self.uvs.len() + self.indices.len()) * 4)
            as u64
    }

    /// Parse the wire layout: magic, version, vertex/index counts, attribute
    /// flags, then the attribute arrays in declaration order.
    pub fn parse(raw: &[u8]) -> DecodeResult<Self> {
        let mut buf = raw;
        if buf.remaining() < 16 {
            return Err(DecodeError::Geometry("blob shorter than header".into()));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(DecodeError::Geometry("bad magic".into()));
        }
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(DecodeError::Geometry(format!("unsupported version {version}")));
        }
        let flags = buf.get_u16_le();
        let vertex_count = buf.get_u32_le() as usize;
        let index_count = buf.get_u32_le() as usize;

        let mut expected = vertex_count * 3 * 4 + index_count * 4;
        if flags & FLAG_NORMALS != 0 {
            expected += vertex_count * 3 * 4;
        }
        if flags & FLAG_UVS != 0 {
            expected += vertex_count * 2 * 4;
        }
        if buf.remaining() != expected {
            return Err(DecodeError::Geometry(format!(
                "payload is {} bytes, header implies {expected}",
                buf.remaining()
            )));
        }

        let mut read_f32s = |n: usize, buf: &mut &[u8]| {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(buf.get_f32_le());
            }
            v
        };

        let positions = read_f32s(vertex_count * 3, &mut buf);
        let normals = if flags & FLAG_NORMALS != 0 {
            read_f32s(vertex_count * 3, &mut buf)
        } else {
            Vec::new()
        };
        let uvs = if flags & FLAG_UVS != 0 {
            read_f32s(vertex_count * 2, &mut buf)
        } else {
            Vec::new()
        };

        let mut indices = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let idx = buf.get_u32_le();
            if idx as usize >= vertex_count {
                return Err(DecodeError::Geometry(format!(
                    "index {idx} out of range for {vertex_count} vertices"
                )));
            }
            indices.push(idx);
        }

        Ok(Self {
            positions,
            normals,
            uvs,
            indices,
        })
    }

    /// Encode into the wire layout. Fixtures and the ingest tooling use
    /// this; the streaming path only ever parses.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut flags = 0u16;
        if !self.normals.is_empty() {
            flags |= FLAG_NORMALS;
        }
        if !self.uvs.is_empty() {
            flags |= FLAG_UVS;
        }

        let mut buf = BytesMut::with_capacity(16 + self.byte_size() as usize);
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u16_le(flags);
        buf.put_u32_le((self.positions.len() / 3) as u32);
        buf.put_u32_le(self.indices.len() as u32);
        for v in self
            .positions
            .iter()
            .chain(self.normals.iter())
            .chain(self.uvs.iter())
        {
            buf.put_f32_le(*v);
        }
        for i in &self.indices {
            buf.put_u32_le(*i);
        }
        buf.freeze()
    }
}
