/// CRC-32C over the transcript followed by the replay script.
pub fn signature(json: &str, script: &str) -> u32 {
    let crc = crc32c::crc32c(json.as_bytes());
    crc32c::crc32c_append(crc, script.as_bytes())
}
