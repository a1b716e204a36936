//! Common Utilities
//! 
//! Provides utility functions used across the GNodeB implementation

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate CRC-24A for 5G NR transport blocks
pub fn crc24a(data: &[u8]) -> u32 {
    const CRC24_POLY: u32 = 0x1864CFB;
    let mut crc: u32 = 0;
    
    for byte in data {
        crc ^= (*byte as u32) << 16;
        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    
    crc & 0xFFFFFF
}

/// Calculate CRC-24C over an unpacked bit sequence (one bit per byte)
///
/// Used by the control channel, where the DCI payload is carried unpacked.
pub fn crc24c_bits(bits: &[u8]) -> u32 {
    const CRC24C_POLY: u64 = 0x1B2B117;
    const ORDER: u32 = 24;
    let highbit = 1u64 << ORDER;
    let mut remainder = 0u64;

    for &bit in bits {
        remainder = (remainder << 1) | (bit & 1) as u64;
        if remainder & highbit != 0 {
            remainder ^= CRC24C_POLY;
        }
    }

    // Flush the register
    for _ in 0..ORDER {
        remainder <<= 1;
        if remainder & highbit != 0 {
            remainder ^= CRC24C_POLY;
        }
    }

    (remainder & (highbit - 1)) as u32
}

/// Unpack bytes into bits (MSB first), one bit per output byte
///
/// Writes `min(out.len(), bytes.len() * 8)` bits.
pub fn bytes_to_bits(bytes: &[u8], out: &mut [u8]) {
    for (i, bit) in out.iter_mut().enumerate().take(bytes.len() * 8) {
        *bit = (bytes[i / 8] >> (7 - (i % 8))) & 1;
    }
}

/// Pack bits (MSB first, one bit per input byte) into bytes
///
/// A trailing partial byte is zero padded.
pub fn bits_to_bytes(bits: &[u8], out: &mut [u8]) {
    for (i, chunk) in bits.chunks(8).enumerate() {
        if i >= out.len() {
            break;
        }
        let mut byte = 0u8;
        for (j, &bit) in chunk.iter().enumerate() {
            byte |= (bit & 1) << (7 - j);
        }
        out[i] = byte;
    }
}

/// Write `nof_bits` of `value` into `bits` MSB first, returning the bits written
pub fn write_bits(bits: &mut [u8], value: u32, nof_bits: usize) -> usize {
    for i in 0..nof_bits {
        bits[i] = ((value >> (nof_bits - 1 - i)) & 1) as u8;
    }
    nof_bits
}

/// Read `nof_bits` MSB first from `bits`
pub fn read_bits(bits: &[u8], nof_bits: usize) -> u32 {
    bits.iter()
        .take(nof_bits)
        .fold(0u32, |acc, &bit| (acc << 1) | (bit & 1) as u32)
}
