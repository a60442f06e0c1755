//! CRC-16 as specified by the SSP wire format: polynomial `0x8005`, seed
//! `0xFFFF`, no input/output reflection, no final XOR.

use crc::{Algorithm, Crc};

const SSP_CRC16: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x8005,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x0000,
    residue: 0x0000,
};

/// Computes the SSP CRC-16 over `data` (the `SEQ/ADDR | LEN | DATA` region).
pub fn crc16(data: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&SSP_CRC16);
    crc.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixed request/response frames exercising three canned exchanges
    // (SYNC, SYNC-response, POLL-to-hopper), cross-checked against an
    // independent bit-by-bit implementation of the same seed/polynomial.
    #[test]
    fn crc16_sync_request() {
        // SEQ/ADDR=0x80 (seq=1,addr=0), LEN=0x01, DATA=0x11 (SYNC opcode)
        let data = [0x80u8, 0x01, 0x11];
        assert_eq!(crc16(&data), 0x8265);
    }

    #[test]
    fn crc16_sync_response() {
        // SEQ/ADDR=0x80, LEN=0x01, DATA=0xF0 (response OK)
        let data = [0x80u8, 0x01, 0xF0];
        assert_eq!(crc16(&data), 0x8023);
    }

    #[test]
    fn crc16_poll_request_addr_hopper() {
        // SEQ/ADDR=0x10 (seq=0,addr=0x10), LEN=0x01, DATA=0x07 (POLL opcode)
        let data = [0x10u8, 0x01, 0x07];
        assert_eq!(crc16(&data), 0x0952);
    }

    #[test]
    fn crc16_distinguishes_header() {
        let a = crc16(&[0x00u8, 0x00]);
        let b = crc16(&[0x01u8, 0x00]);
        assert_ne!(a, b);
    }
}
