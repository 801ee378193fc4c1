// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no final xor).

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

const CRC16_POLY: u16 = 0x1021;
const CRC16_INIT: u16 = 0xFFFF;

#[inline(always)]
fn crc16_byte(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        if (crc & 0x8000) != 0 {
            crc = (crc << 1) ^ CRC16_POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    bytes.iter().fold(CRC16_INIT, |crc, &b| crc16_byte(crc, b))
}

/// Same CRC over 16-bit words, each fed MSB first.
pub fn crc16_words(words: &[u16]) -> u16 {
    words.iter().fold(CRC16_INIT, |crc, &w| {
        let [hi, lo] = w.to_be_bytes();
        crc16_byte(crc16_byte(crc, hi), lo)
    })
}
