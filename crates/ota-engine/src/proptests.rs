//! Property-based tests for ota-engine.
//!
//! # Properties Tested
//!
//! - Version comparison is a consistent order on prefixed versions
//! - CRC32 does not depend on how the input is split
//! - Catalog and manifest tables survive a flash round trip
//! - Progress events are bounded, increasing and end at 100
//! - A built package streams into flash and verifies

#![cfg(test)]

use std::io::Cursor;

use proptest::prelude::*;

use crate::catalog::{VersionCatalog, VersionEntry, MAX_VERSIONS};
use crate::events::mailbox;
use crate::integrity::{crc32, Crc32, IntegrityVerifier};
use crate::manifest::FirmwareManifestStore;
use crate::package::{PackageBuilder, PackageParser};
use crate::storage::{program, MemoryFlash};
use crate::version::{compare, VersionOrdering};
use crate::writer::{ProgressTracker, StreamingFlashWriter};
use crate::CHUNK_SIZE;

const FLASH_BASE: u32 = 0x1000_0000;
const FLASH_SIZE: usize = 0x4_0000;

// =============================================================================
// Generators
// =============================================================================

/// Generate version components.
fn arb_components() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..1000, 1..5)
}

fn render(prefix: &str, parts: &[u32]) -> String {
    let joined: Vec<String> = parts.iter().map(u32::to_string).collect();
    format!("{prefix}{}", joined.join("."))
}

/// Generate a catalog entry with printable fields.
fn arb_version_entry() -> impl Strategy<Value = VersionEntry> {
    ("v[0-9]{1,3}\\.[0-9]{1,3}", "http://[a-z]{1,20}/[a-z0-9/]{1,60}\\.bin", any::<bool>())
        .prop_map(|(name, locator, flag)| VersionEntry::new(&name, &locator, flag))
}

/// Generate firmware payloads (up to three files, the last may be empty).
fn arb_payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..5000), 1..=3)
}

// =============================================================================
// Version ordering
// =============================================================================

proptest! {
    #[test]
    fn prop_compare_is_reflexive(parts in arb_components()) {
        let v = render("v", &parts);
        prop_assert_eq!(compare(&v, &v), VersionOrdering::Equal);
    }

    #[test]
    fn prop_compare_is_antisymmetric(a in arb_components(), b in arb_components()) {
        let (va, vb) = (render("v", &a), render("v", &b));
        let forward = compare(&va, &vb);
        let backward = compare(&vb, &va);
        match forward {
            VersionOrdering::Greater => prop_assert_eq!(backward, VersionOrdering::Less),
            VersionOrdering::Less => prop_assert_eq!(backward, VersionOrdering::Greater),
            VersionOrdering::Equal => prop_assert_eq!(backward, VersionOrdering::Equal),
            VersionOrdering::Incomparable => prop_assert!(false, "prefixed versions must compare"),
        }
    }

    #[test]
    fn prop_trailing_zero_is_equal(parts in arb_components()) {
        let mut padded = parts.clone();
        padded.push(0);
        prop_assert_eq!(
            compare(&render("v", &parts), &render("v", &padded)),
            VersionOrdering::Equal
        );
    }

    #[test]
    fn prop_prefix_mismatch_is_incomparable(a in arb_components(), b in arb_components()) {
        prop_assert_eq!(
            compare(&render("v", &a), &render("", &b)),
            VersionOrdering::Incomparable
        );
    }
}

// =============================================================================
// CRC32
// =============================================================================

proptest! {
    #[test]
    fn prop_crc_independent_of_split(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(data.len() + 1);
        let mut running = Crc32::new();
        running.update(&data[..at]);
        running.update(&data[at..]);
        prop_assert_eq!(running.finalize(), crc32(&data));
    }

    #[test]
    fn prop_region_crc_matches_written_bytes(data in prop::collection::vec(any::<u8>(), 1..(3 * CHUNK_SIZE))) {
        let flash = MemoryFlash::new(FLASH_BASE, FLASH_SIZE);
        program(&flash, FLASH_BASE + 0x100, &data).unwrap();

        let verifier = IntegrityVerifier::new(&flash);
        let crc = verifier.region_crc(FLASH_BASE + 0x100, data.len() as u32).unwrap();
        prop_assert_eq!(crc, crc32(&data));
    }
}

// =============================================================================
// Persisted tables
// =============================================================================

proptest! {
    #[test]
    fn prop_catalog_roundtrip(entries in prop::collection::vec(arb_version_entry(), 0..=MAX_VERSIONS)) {
        let flash = MemoryFlash::new(FLASH_BASE, FLASH_SIZE);
        let catalog = VersionCatalog::new(&flash, FLASH_BASE);
        catalog.replace_all(&entries).unwrap();

        let present: Vec<VersionEntry> = catalog
            .present()
            .unwrap()
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        prop_assert_eq!(present, entries);
    }

    #[test]
    fn prop_clear_flags_empties_catalog(entries in prop::collection::vec(arb_version_entry(), 1..=MAX_VERSIONS)) {
        let flash = MemoryFlash::new(FLASH_BASE, FLASH_SIZE);
        let catalog = VersionCatalog::new(&flash, FLASH_BASE);
        catalog.replace_all(&entries).unwrap();
        catalog.clear_update_flags().unwrap();

        prop_assert!(catalog.entries().unwrap().iter().all(|e| !e.needs_update));
    }
}

// =============================================================================
// Progress
// =============================================================================

proptest! {
    #[test]
    fn prop_progress_events_bounded_and_increasing(total in 1u64..500_000, step in 1u64..4096) {
        let mut tracker = ProgressTracker::new();
        let mut events = Vec::new();
        let mut written = 0u64;
        while written < total {
            written = (written + step).min(total);
            if let Some(percent) = tracker.observe(written, total) {
                events.push(percent);
            }
        }

        prop_assert!(events.len() <= 21, "too many events: {:?}", events);
        prop_assert_eq!(events.last().copied(), Some(100));
        prop_assert!(events.windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", events);
    }
}

// =============================================================================
// Package install
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_built_package_installs_and_verifies(payloads in arb_payloads()) {
        let flash = MemoryFlash::new(FLASH_BASE, FLASH_SIZE);
        let (events, _rx) = mailbox(64);

        let mut builder = PackageBuilder::new();
        for (i, payload) in payloads.iter().enumerate() {
            let dest = FLASH_BASE + 0x1_0000 * (i as u32 + 1);
            builder = builder
                .add_file(&format!("image{i}.bin"), dest, 0x8000, payload.clone())
                .unwrap();
        }
        let package = builder.build().unwrap();

        let store = FirmwareManifestStore::new(&flash, FLASH_BASE);
        let mut stream = Cursor::new(package);
        let parsed = PackageParser::new(&store).parse(&mut stream).unwrap();
        prop_assert_eq!(&store.load().unwrap(), &parsed.manifest);

        let mut writer = StreamingFlashWriter::new(&flash, &events);
        let verifier = IntegrityVerifier::new(&flash);
        for entry in &parsed.manifest {
            writer.write_entry(entry, &mut stream).unwrap();
            if entry.compressed_len > 0 {
                verifier.verify(entry).unwrap();
            }
        }
    }
}
