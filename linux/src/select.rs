use crate::MemoryRegion;

/// label substrings marking a region worth capturing: the heap, the
/// stack, and mappings of files unlinked while still mapped.
pub const FORENSIC_MARKERS: [&str; 3] = ["[heap]", "[stack]", "deleted"];

/// case-sensitive, unanchored substring match against [`FORENSIC_MARKERS`].
pub fn is_selected(region: &MemoryRegion) -> bool {
    FORENSIC_MARKERS
        .iter()
        .any(|marker| region.label.contains(marker))
}
