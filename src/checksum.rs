use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{Location, Result, XfsError};

/// CRC32C of `buf` with the 4-byte checksum field at `crc_offset` read as zero.
pub fn compute_cksum(buf: &[u8], crc_offset: usize) -> u32 {
    let crc = crc32c::crc32c(&buf[..crc_offset]);
    let crc = crc32c::crc32c_append(crc, &[0u8; 4]);
    crc32c::crc32c_append(crc, &buf[crc_offset + 4..])
}

/// The checksum is stored little-endian even though every other field is big-endian.
pub fn stored_cksum(buf: &[u8], crc_offset: usize) -> u32 {
    LittleEndian::read_u32(&buf[crc_offset..crc_offset + 4])
}

pub fn verify_cksum(buf: &[u8], crc_offset: usize, at: Location) -> Result<()> {
    let stored = stored_cksum(buf, crc_offset);
    let computed = compute_cksum(buf, crc_offset);
    if stored != computed {
        debug!("{}: crc 0x{:08x} != computed 0x{:08x}", at, stored, computed);
        return Err(XfsError::corrupt(
            at,
            format!(
                "checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
                stored, computed
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub fn update_cksum(buf: &mut [u8], crc_offset: usize) {
    let crc = compute_cksum(buf, crc_offset);
    LittleEndian::write_u32(&mut buf[crc_offset..crc_offset + 4], crc);
}
