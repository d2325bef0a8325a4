use std::io::Write;
use std::sync::Arc;

use crate::bref::bits::{pack_values, write_i32, write_string, write_u16};
use crate::bref::seq_coder::SeqCoder;
use crate::model::chrom_ids::ChromIds;
use crate::model::marker::{bit_len, Marker};
use crate::model::ref_gt_rec::RefGTRec;
use crate::model::samples::Samples;
use crate::utils::errors::KelpieError;

pub const BREF3_MAGIC: &[u8; 5] = b"bref3";
pub const END_OF_DATA: u16 = 0xFFFF;

/// Entry of the seek index that can accompany a bref3 file: where each
/// block starts, and the chromosome/position of its first marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrefBlock {
    pub chrom: u16,
    pub pos: u32,
    pub offset: u64,
}

/**
 * Streaming bref3 writer.
 *
 * Records arrive in marker order. A record enters sequence coding iff its
 * marker has at most 255 alleles and at least max_n_seq/4 + 1 non-major
 * allele copies; anything else is written verbatim as a single-marker
 * allele-coded block. The open sequence block is closed when the coder
 * runs out of distinct sequences (the record is then re-added to the
 * freshly reset coder), when a passthrough record must keep the stream in
 * marker order, or when the block reaches MAX_BLOCK_MARKERS markers.
 */
pub struct Bref3Writer<W: Write> {
    out: W,
    chrom_ids: Arc<ChromIds>,
    samples: Arc<Samples>,
    coder: SeqCoder,
    max_n_seq: usize,
    offset: u64,
    blocks: Vec<BrefBlock>,
}

impl<W: Write> Bref3Writer<W> {
    /// Cap on markers per sequence block, bounding decoder memory.
    pub const MAX_BLOCK_MARKERS: usize = 4096;

    pub fn new(
        mut out: W,
        program: &str,
        samples: Arc<Samples>,
        chrom_ids: Arc<ChromIds>,
        max_n_seq: usize,
    ) -> Result<Bref3Writer<W>, KelpieError> {
        let coder = SeqCoder::new(samples.n_haps(), max_n_seq)?;
        out.write_all(BREF3_MAGIC)?;
        let mut offset = BREF3_MAGIC.len() as u64;
        offset += write_string(&mut out, program)? as u64;
        offset += write_i32(&mut out, samples.n_samples() as i32)? as u64;
        for sample in 0..samples.n_samples() {
            offset += write_string(&mut out, samples.id(sample))? as u64;
        }
        Ok(Bref3Writer {
            out,
            chrom_ids,
            samples,
            coder,
            max_n_seq,
            offset,
            blocks: Vec::new(),
        })
    }

    pub fn write(&mut self, rec: &RefGTRec) -> Result<(), KelpieError> {
        if !Arc::ptr_eq(rec.samples(), &self.samples) && *rec.samples().as_ref() != *self.samples {
            return Err(KelpieError::InvariantViolation(
                "Record sample list differs from the writer's".to_string(),
            ));
        }
        let rec = rec.to_allele_coded();
        if self.seq_codable(&rec) {
            if !self.coder.try_add(&rec)? {
                self.flush_coder()?;
                if !self.coder.try_add(&rec)? {
                    return Err(KelpieError::InvariantViolation(
                        "Record rejected by a freshly reset sequence coder".to_string(),
                    ));
                }
            }
            if self.coder.n_buffered() >= Self::MAX_BLOCK_MARKERS {
                self.flush_coder()?;
            }
        } else {
            // keep blocks in marker order: a sparse marker closes the run
            self.flush_coder()?;
            self.write_passthrough(&rec)?;
        }
        Ok(())
    }

    /// Flushes any open block, writes the end-of-data sentinel, and hands
    /// back the sink together with the seek index.
    pub fn finish(mut self) -> Result<(W, Vec<BrefBlock>), KelpieError> {
        self.flush_coder()?;
        write_u16(&mut self.out, END_OF_DATA)?;
        self.out.flush()?;
        Ok((self.out, self.blocks))
    }

    fn seq_codable(&self, rec: &RefGTRec) -> bool {
        rec.n_alleles() <= 255 && rec.non_major_count() >= self.max_n_seq / 4 + 1
    }

    fn flush_coder(&mut self) -> Result<(), KelpieError> {
        let recs = self.coder.flush()?;
        if recs.is_empty() {
            return Ok(());
        }
        let first_marker = recs[0].marker();
        self.blocks.push(BrefBlock {
            chrom: first_marker.chrom(),
            pos: first_marker.pos(),
            offset: self.offset,
        });
        let coded = recs[0]
            .as_seq_coded()
            .expect("sequence coder emitted a non-sequence-coded record");
        let n_seq = coded.n_seq();
        self.offset += write_u16(&mut self.out, n_seq as u16)? as u64;
        let hap_width = bit_len(n_seq - 1);
        let packed = pack_values(coded.hap_to_seq().iter().map(|&s| s as u32), hap_width);
        self.out.write_all(&packed)?;
        self.offset += packed.len() as u64;
        self.offset += write_i32(&mut self.out, recs.len() as i32)? as u64;
        for rec in &recs {
            self.write_marker(rec.marker())?;
            let coded = rec.as_seq_coded().unwrap();
            let allele_width = bit_len(rec.n_alleles() - 1);
            let packed = pack_values(
                coded.seq_to_allele().iter().map(|&a| a as u32),
                allele_width,
            );
            self.out.write_all(&packed)?;
            self.offset += packed.len() as u64;
        }
        Ok(())
    }

    fn write_passthrough(&mut self, rec: &RefGTRec) -> Result<(), KelpieError> {
        let ac = rec
            .as_allele_coded()
            .expect("passthrough records are allele-coded");
        let marker = rec.marker();
        self.blocks.push(BrefBlock {
            chrom: marker.chrom(),
            pos: marker.pos(),
            offset: self.offset,
        });
        self.offset += write_u16(&mut self.out, 0)? as u64;
        self.write_marker(marker)?;
        let index_width = bit_len(self.samples.n_haps() - 1);
        for a in 0..rec.n_alleles() {
            match ac.carriers(a) {
                // the major allele's carriers stay implicit
                None => {
                    self.offset += write_i32(&mut self.out, -1)? as u64;
                }
                Some(list) => {
                    self.offset += write_i32(&mut self.out, list.len() as i32)? as u64;
                    let packed = pack_values(list.iter().copied(), index_width);
                    self.out.write_all(&packed)?;
                    self.offset += packed.len() as u64;
                }
            }
        }
        Ok(())
    }

    fn write_marker(&mut self, marker: &Marker) -> Result<(), KelpieError> {
        let chrom = self.chrom_ids.name(marker.chrom());
        self.offset += write_string(&mut self.out, chrom)? as u64;
        self.offset += write_i32(&mut self.out, marker.pos() as i32)? as u64;
        self.offset += write_i32(&mut self.out, marker.n_alleles() as i32)? as u64;
        for allele in marker.alleles() {
            self.offset += write_string(&mut self.out, allele)? as u64;
        }
        Ok(())
    }
}
