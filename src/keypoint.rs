use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// 单个特征点记录的字节数
pub const RECORD_SIZE: usize = 5 * 8 + 2 * 4;

const MAGIC: &[u8; 4] = b"FMKP";
const VERSION: u8 = 1;

/// 检测器输出的特征点，创建后不再修改
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// 特征点邻域直径
    pub scale: f64,
    /// 主方向，弧度
    pub orientation: f64,
    pub response: f64,
    /// 所在的金字塔层
    pub octave: i32,
    pub class_id: i32,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, scale: f64, orientation: f64, response: f64) -> Self {
        Self { x, y, scale, orientation, response, octave: 0, class_id: -1 }
    }
}

pub type Record = [u8; RECORD_SIZE];

/// 将特征点编码为定长的小端序记录
pub fn encode(kp: &Keypoint) -> Record {
    let mut record = [0u8; RECORD_SIZE];
    let mut w = &mut record[..];
    // 写入定长缓冲区不会失败
    for v in [kp.x, kp.y, kp.scale, kp.orientation, kp.response] {
        w.write_f64::<LittleEndian>(v).ok();
    }
    w.write_i32::<LittleEndian>(kp.octave).ok();
    w.write_i32::<LittleEndian>(kp.class_id).ok();
    record
}

/// 从记录中解码特征点，长度不符时返回 DecodeError
pub fn decode(record: &[u8]) -> Result<Keypoint> {
    if record.len() != RECORD_SIZE {
        return Err(Error::decode(
            "keypoint",
            format!("记录长度应为 {} 字节，实际为 {}", RECORD_SIZE, record.len()),
        ));
    }
    let mut r = Cursor::new(record);
    let mut f = || r.read_f64::<LittleEndian>().map_err(|e| Error::decode("keypoint", e));
    let (x, y, scale, orientation, response) = (f()?, f()?, f()?, f()?, f()?);
    let octave = r.read_i32::<LittleEndian>().map_err(|e| Error::decode("keypoint", e))?;
    let class_id = r.read_i32::<LittleEndian>().map_err(|e| Error::decode("keypoint", e))?;
    Ok(Keypoint { x, y, scale, orientation, response, octave, class_id })
}

/// 编码整组特征点：魔数、版本号、数量，然后是逐个记录
pub fn encode_all<W: Write>(writer: &mut W, keypoints: &[Keypoint]) -> std::io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_u8(VERSION)?;
    writer.write_u64::<LittleEndian>(keypoints.len() as u64)?;
    for kp in keypoints {
        writer.write_all(&encode(kp))?;
    }
    Ok(())
}

pub fn decode_all(bytes: &[u8]) -> Result<Vec<Keypoint>> {
    let mut r = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(|e| Error::decode("keypoints", e))?;
    if &magic != MAGIC {
        return Err(Error::decode("keypoints", "文件头不正确"));
    }
    let version = r.read_u8().map_err(|e| Error::decode("keypoints", e))?;
    if version != VERSION {
        return Err(Error::decode("keypoints", format!("不支持的版本 {}", version)));
    }
    let count = r.read_u64::<LittleEndian>().map_err(|e| Error::decode("keypoints", e))?;

    let body = &bytes[r.position() as usize..];
    if (body.len() as u64) != count.saturating_mul(RECORD_SIZE as u64) {
        return Err(Error::decode(
            "keypoints",
            format!("声明了 {} 个特征点，但数据长度为 {} 字节", count, body.len()),
        ));
    }
    body.chunks_exact(RECORD_SIZE).map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Keypoint> {
        vec![
            Keypoint::new(12.5, 300.25, 3.1, 1.25, 0.033),
            Keypoint { octave: 3, class_id: 7, ..Keypoint::new(-0.0, 1e-300, 0.0, -2.5, 1e10) },
            Keypoint::new(f64::MAX, f64::MIN_POSITIVE, 64.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_record_roundtrip() {
        for kp in sample() {
            let record = encode(&kp);
            let decoded = decode(&record).unwrap();
            assert_eq!(decoded, kp);
            assert_eq!(decoded.x.to_bits(), kp.x.to_bits());
        }
    }

    #[test]
    fn test_record_layout_is_little_endian() {
        let record = encode(&Keypoint::new(1.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(&record[..8], &1.0f64.to_le_bytes());
        assert_eq!(&record[40..44], &0i32.to_le_bytes());
        assert_eq!(&record[44..48], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_decode_wrong_length() {
        let record = encode(&sample()[0]);
        assert!(matches!(decode(&record[..47]), Err(Error::Decode { .. })));
        assert!(matches!(decode(&[]), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_file_roundtrip() {
        let kps = sample();
        let mut buf = vec![];
        encode_all(&mut buf, &kps).unwrap();
        assert_eq!(buf.len(), 4 + 1 + 8 + kps.len() * RECORD_SIZE);
        assert_eq!(decode_all(&buf).unwrap(), kps);
    }

    #[test]
    fn test_file_empty() {
        let mut buf = vec![];
        encode_all(&mut buf, &[]).unwrap();
        assert!(decode_all(&buf).unwrap().is_empty());
    }

    #[test]
    fn test_file_truncated() {
        let mut buf = vec![];
        encode_all(&mut buf, &sample()).unwrap();
        buf.pop();
        assert!(matches!(decode_all(&buf), Err(Error::Decode { .. })));
        assert!(matches!(decode_all(b"FMK"), Err(Error::Decode { .. })));
        assert!(matches!(decode_all(b"XXXX\x01"), Err(Error::Decode { .. })));
    }
}
