mod tests_disk_roundtrip;
