// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! CRC-32 (IEEE, reflected) used to protect frame payloads.
//!
//! The checksum covers the payload bytes as they appear on the wire, i.e.
//! after compression when compression is applied.

use std::sync::OnceLock;

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

static CRC32_TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn table() -> &'static [u32; 256] {
    CRC32_TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0u32;
        while i < 256 {
            let mut crc = i;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ CRC32_POLYNOMIAL;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i as usize] = crc;
            i += 1;
        }
        table
    })
}

/// Compute the CRC-32 of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let table = table();
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = table[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Check `data` against an expected CRC-32 value.
#[must_use]
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32(data) == expected
}
