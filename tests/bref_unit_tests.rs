extern crate kelpie_genome;

use std::sync::Arc;

use kelpie_genome::bref::reader::Bref3Reader;
use kelpie_genome::bref::seq_coder::SeqCoder;
use kelpie_genome::bref::writer::Bref3Writer;
use kelpie_genome::model::chrom_ids::ChromIds;
use kelpie_genome::model::marker::Marker;
use kelpie_genome::model::ref_gt_rec::{AlleleCodedRec, RefGTRec};
use kelpie_genome::model::samples::Samples;

fn samples(n: usize) -> Arc<Samples> {
    let ids = (0..n).map(|i| format!("s{}", i)).collect();
    Arc::new(Samples::from_ids(ids).unwrap())
}

fn rec(
    chrom: u16,
    pos: u32,
    n_alleles: usize,
    samples: &Arc<Samples>,
    alleles_by_hap: &[usize],
) -> RefGTRec {
    let allele_strings: Vec<String> = ["A", "C", "G", "T"]
        .iter()
        .take(n_alleles)
        .map(|s| s.to_string())
        .collect();
    let marker = Marker::new(chrom, pos, None, allele_strings).unwrap();
    let mut lists = vec![Vec::new(); n_alleles];
    for (h, &a) in alleles_by_hap.iter().enumerate() {
        lists[a].push(h as u32);
    }
    RefGTRec::AlleleCoded(
        AlleleCodedRec::from_carrier_lists(marker, samples.clone(), lists).unwrap(),
    )
}

#[test]
fn default_max_n_seq_grows_with_panel_size() {
    assert_eq!(SeqCoder::default_max_n_seq(1), 3);
    assert_eq!(SeqCoder::default_max_n_seq(1000), 194);
    assert_eq!(SeqCoder::default_max_n_seq(100_000_000), 65534);
}

#[test]
fn adding_the_same_record_twice_is_a_no_op() {
    let samples = samples(4);
    let record = rec(0, 100, 2, &samples, &[0, 1, 0, 1, 1, 0, 0, 0]);
    let mut once = SeqCoder::new(8, 100).unwrap();
    assert!(once.try_add(&record).unwrap());
    let mut twice = SeqCoder::new(8, 100).unwrap();
    assert!(twice.try_add(&record).unwrap());
    assert!(twice.try_add(&record).unwrap());
    assert_eq!(once.hap_to_seq(), twice.hap_to_seq());
    assert_eq!(once.seq_counts(), twice.seq_counts());
    assert_eq!(once.n_seq_allocated(), twice.n_seq_allocated());
}

#[test]
fn over_capacity_add_is_rejected_without_mutation() {
    let samples = samples(2);
    let mut coder = SeqCoder::new(4, 3).unwrap();
    // first split: {2,3} leave the seed class, allocation count 2
    assert!(coder
        .try_add(&rec(0, 100, 2, &samples, &[0, 0, 1, 1]))
        .unwrap());
    assert_eq!(coder.n_seq_allocated(), 2);
    let before_haps = coder.hap_to_seq().to_vec();
    let before_cnts = coder.seq_counts().to_vec();
    // both classes would split, pushing the allocation count to 4 >= 3
    let overflow = rec(0, 200, 2, &samples, &[0, 1, 0, 1]);
    assert!(!coder.try_add(&overflow).unwrap());
    assert_eq!(coder.hap_to_seq(), &before_haps[..]);
    assert_eq!(coder.seq_counts(), &before_cnts[..]);
    assert_eq!(coder.n_buffered(), 1);
    // flush resets to the single empty class, and the retry succeeds
    let flushed = coder.flush().unwrap();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].as_seq_coded().unwrap().n_seq(), 2);
    assert_eq!(coder.seq_counts(), &[4]);
    assert!(coder.hap_to_seq().iter().all(|&s| s == 0));
    assert!(coder.try_add(&overflow).unwrap());
    let reflushed = coder.flush().unwrap();
    assert_eq!(reflushed.len(), 1);
    for h in 0..4 {
        assert_eq!(reflushed[0].allele(h), overflow.allele(h));
    }
}

#[test]
fn flushed_records_preserve_every_allele() {
    let samples = samples(3);
    let mut coder = SeqCoder::new(6, 50).unwrap();
    let records = vec![
        rec(0, 100, 2, &samples, &[0, 1, 0, 1, 0, 0]),
        rec(0, 200, 3, &samples, &[2, 0, 0, 1, 0, 0]),
        rec(0, 300, 2, &samples, &[1, 1, 0, 0, 0, 1]),
    ];
    for record in &records {
        assert!(coder.try_add(record).unwrap());
    }
    let coded = coder.flush().unwrap();
    assert_eq!(coded.len(), 3);
    let shared = coded[0].as_seq_coded().unwrap().hap_to_seq().clone();
    for (original, converted) in records.iter().zip(coded.iter()) {
        let sc = converted.as_seq_coded().unwrap();
        assert!(Arc::ptr_eq(sc.hap_to_seq(), &shared));
        for h in 0..6 {
            assert_eq!(converted.allele(h), original.allele(h), "hap {}", h);
        }
        // count invariants carry over
        let total: usize = (0..original.n_alleles())
            .map(|a| converted.allele_count(a))
            .sum();
        assert_eq!(total, 6);
    }
}

fn build_panel(samples: &Arc<Samples>) -> Vec<RefGTRec> {
    vec![
        // dense markers that sequence-code
        rec(0, 1_000, 2, samples, &[0, 1, 0, 1, 1, 0]),
        rec(0, 2_000, 2, samples, &[1, 1, 0, 0, 1, 0]),
        // a sparse marker written as an allele-coded passthrough
        rec(0, 3_000, 2, samples, &[0, 0, 0, 0, 0, 1]),
        // a multiallelic dense marker
        rec(0, 4_000, 3, samples, &[0, 2, 1, 1, 0, 2]),
        rec(0, 5_000, 2, samples, &[1, 0, 1, 0, 1, 0]),
        // a second chromosome
        rec(1, 500, 2, samples, &[0, 1, 1, 0, 1, 1]),
    ]
}

fn encode(recs: &[RefGTRec], samples: &Arc<Samples>, chrom_ids: &Arc<ChromIds>) -> Vec<u8> {
    let mut writer = Bref3Writer::new(
        Vec::new(),
        "kelpie test",
        samples.clone(),
        chrom_ids.clone(),
        8,
    )
    .unwrap();
    for rec in recs {
        writer.write(rec).unwrap();
    }
    let (bytes, blocks) = writer.finish().unwrap();
    assert!(!blocks.is_empty());
    bytes
}

#[test]
fn encode_decode_encode_is_byte_identical() {
    let samples = samples(3);
    let mut chrom_ids = ChromIds::new();
    chrom_ids.get_or_insert("chr1").unwrap();
    chrom_ids.get_or_insert("chr2").unwrap();
    let chrom_ids = Arc::new(chrom_ids);
    let panel = build_panel(&samples);
    // with max_n_seq = 8 the sparse marker (one non-major copy < 8/4 + 1)
    // takes the passthrough path and the rest sequence-code
    let bytes = encode(&panel, &samples, &chrom_ids);

    let mut decode_ids = ChromIds::new();
    let mut reader = Bref3Reader::new(&bytes[..], &mut decode_ids).unwrap();
    assert_eq!(reader.program(), "kelpie test");
    let decoded_samples = reader.samples().clone();
    assert_eq!(decoded_samples.ids(), samples.ids());
    let mut decoded = Vec::new();
    while let Some(r) = reader.next_rec().unwrap() {
        decoded.push(r);
    }
    assert_eq!(decoded.len(), panel.len());
    for (original, roundtripped) in panel.iter().zip(decoded.iter()) {
        assert_eq!(original.marker(), roundtripped.marker());
        assert_eq!(original.major_allele(), roundtripped.major_allele());
        for h in 0..original.n_haps() {
            assert_eq!(original.allele(h), roundtripped.allele(h));
        }
    }
    // the sparse marker decodes allele-coded, dense markers sequence-coded
    assert!(!decoded[2].is_seq_coded());
    assert!(decoded[0].is_seq_coded());

    let mut reencode_ids = ChromIds::new();
    reencode_ids.get_or_insert("chr1").unwrap();
    reencode_ids.get_or_insert("chr2").unwrap();
    let bytes_again = encode(&decoded, &decoded_samples, &Arc::new(reencode_ids));
    assert_eq!(bytes, bytes_again);
}

#[test]
fn block_index_tracks_block_starts() {
    let samples = samples(3);
    let mut chrom_ids = ChromIds::new();
    chrom_ids.get_or_insert("chr1").unwrap();
    chrom_ids.get_or_insert("chr2").unwrap();
    let chrom_ids = Arc::new(chrom_ids);
    let panel = build_panel(&samples);
    let mut writer =
        Bref3Writer::new(Vec::new(), "kelpie test", samples, chrom_ids, 8).unwrap();
    for rec in &panel {
        writer.write(rec).unwrap();
    }
    let (bytes, blocks) = writer.finish().unwrap();
    // expected blocks: sequence [1000, 2000], passthrough [3000],
    // sequence [4000, 5000], passthrough [chr2:500]
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0].pos, 1_000);
    assert_eq!(blocks[1].pos, 3_000);
    assert_eq!(blocks[2].pos, 4_000);
    // offsets are increasing and within the stream
    for pair in blocks.windows(2) {
        assert!(pair[0].offset < pair[1].offset);
    }
    assert!(blocks.last().unwrap().offset < bytes.len() as u64);
    // a decoding pass rebuilds the same index
    let mut decode_ids = ChromIds::new();
    let mut reader = Bref3Reader::new(&bytes[..], &mut decode_ids).unwrap();
    while reader.next_rec().unwrap().is_some() {}
    assert_eq!(reader.blocks().len(), blocks.len());
    for (w, r) in blocks.iter().zip(reader.blocks().iter()) {
        assert_eq!(w.offset, r.offset);
        assert_eq!(w.pos, r.pos);
    }
}

#[test]
fn truncated_and_corrupt_streams_are_format_errors() {
    let samples = samples(3);
    let mut chrom_ids = ChromIds::new();
    chrom_ids.get_or_insert("chr1").unwrap();
    chrom_ids.get_or_insert("chr2").unwrap();
    let chrom_ids = Arc::new(chrom_ids);
    let bytes = encode(&build_panel(&samples), &samples, &chrom_ids);

    // bad magic
    let mut corrupt = bytes.clone();
    corrupt[0] = b'x';
    let mut ids = ChromIds::new();
    assert!(Bref3Reader::new(&corrupt[..], &mut ids).is_err());

    // truncation in the body: drop the sentinel and half a block
    let truncated = &bytes[..bytes.len() - 20];
    let mut ids = ChromIds::new();
    let mut reader = Bref3Reader::new(truncated, &mut ids).unwrap();
    let mut result = Ok(());
    loop {
        match reader.next_rec() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    assert!(result.is_err());
}

#[test]
fn writer_keeps_marker_order_across_passthrough_records() {
    let samples = samples(3);
    let mut chrom_ids = ChromIds::new();
    chrom_ids.get_or_insert("chr1").unwrap();
    chrom_ids.get_or_insert("chr2").unwrap();
    let chrom_ids = Arc::new(chrom_ids);
    let panel = build_panel(&samples);
    let bytes = encode(&panel, &samples, &chrom_ids);
    let mut ids = ChromIds::new();
    let mut reader = Bref3Reader::new(&bytes[..], &mut ids).unwrap();
    let mut positions = Vec::new();
    while let Some(r) = reader.next_rec().unwrap() {
        positions.push((r.marker().chrom(), r.marker().pos()));
    }
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}
