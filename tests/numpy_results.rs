//! Results pickled straight from numpy, the way OpenPCDet-style evaluation
//! scripts dump `result.pkl`.
//!
//! The fixtures are assembled opcode by opcode so the layout matches what
//! `pickle.dumps` emits for `np.ndarray` and `np.dtype` objects.

use std::path::PathBuf;

use tempfile::TempDir;

use lidar_results_txt::{convert, ConvertError, Converter, NoopObserver};

const MARK: u8 = b'(';
const STOP: u8 = b'.';
const NONE: u8 = b'N';
const NEWTRUE: u8 = 0x88;
const NEWFALSE: u8 = 0x89;
const TUPLE: u8 = b't';
const TUPLE1: u8 = 0x85;
const TUPLE3: u8 = 0x87;
const REDUCE: u8 = b'R';
const BUILD: u8 = b'b';
const EMPTY_LIST: u8 = b']';
const EMPTY_DICT: u8 = b'}';
const APPENDS: u8 = b'e';
const SETITEMS: u8 = b'u';

struct Pickle(Vec<u8>);

impl Pickle {
    fn new() -> Self {
        Pickle(vec![0x80, 3])
    }

    fn op(&mut self, code: u8) -> &mut Self {
        self.0.push(code);
        self
    }

    fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.0.push(b'c');
        self.0.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
        self
    }

    fn int(&mut self, v: i32) -> &mut Self {
        self.0.push(b'J');
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn string(&mut self, s: &str) -> &mut Self {
        self.0.push(b'X');
        self.0.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.push(b'B');
        self.0.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.0.extend_from_slice(data);
        self
    }

    fn put(&mut self, memo: u8) -> &mut Self {
        self.0.extend_from_slice(&[b'q', memo]);
        self
    }

    fn get(&mut self, memo: u8) -> &mut Self {
        self.0.extend_from_slice(&[b'h', memo]);
        self
    }

    /// `np.dtype(code)` on first use: reduce, memoize, then `__setstate__`.
    fn dtype(&mut self, code: &str, elsize: i32, alignment: i32, memo: u8) -> &mut Self {
        self.global("numpy", "dtype")
            .string(code)
            .op(NEWFALSE)
            .op(NEWTRUE)
            .op(TUPLE3)
            .op(REDUCE)
            .put(memo)
            .op(MARK)
            .int(3)
            .string("<")
            .op(NONE)
            .op(NONE)
            .op(NONE)
            .int(elsize)
            .int(alignment)
            .int(0)
            .op(TUPLE)
            .op(BUILD)
    }

    /// `np.ndarray` via `_reconstruct` and `__setstate__`; `dtype` pushes the
    /// dtype object.
    fn ndarray(
        &mut self,
        shape: &[i32],
        dtype: impl FnOnce(&mut Self) -> &mut Self,
        data: &[u8],
    ) -> &mut Self {
        self.global("numpy.core.multiarray", "_reconstruct")
            .global("numpy", "ndarray")
            .int(0)
            .op(TUPLE1)
            .bytes(b"b")
            .op(TUPLE3)
            .op(REDUCE)
            .op(MARK)
            .int(1)
            .op(MARK);
        for dim in shape {
            self.int(*dim);
        }
        self.op(TUPLE);
        dtype(self);
        self.op(NEWFALSE).bytes(data).op(TUPLE).op(BUILD)
    }

    fn finish(&mut self) -> Vec<u8> {
        self.op(STOP);
        std::mem::take(&mut self.0)
    }
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn utf32_bytes(s: &str, width: usize) -> Vec<u8> {
    let mut raw: Vec<u8> = s.chars().flat_map(|c| (c as u32).to_le_bytes()).collect();
    raw.resize(width * 4, 0);
    raw
}

fn write_source(dir: &TempDir, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join("result.pkl");
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

#[test]
fn float32_arrays_render_single_precision_values() -> Result<(), ConvertError> {
    let mut p = Pickle::new();
    p.op(EMPTY_LIST).op(MARK).op(EMPTY_DICT).op(MARK);
    p.string("frame_id").string("000001");
    p.string("boxes_lidar").ndarray(
        &[1, 7],
        |p| p.dtype("f4", -1, -1, 10),
        &f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.1]),
    );
    p.string("score")
        .ndarray(&[1], |p| p.get(10), &f32_bytes(&[0.87]));
    p.string("name")
        .ndarray(&[1], |p| p.dtype("U3", 12, 4, 11), &utf32_bytes("Car", 3));
    p.op(SETITEMS).op(APPENDS);
    let dir = tempfile::tempdir().expect("tempdir");
    let source = write_source(&dir, &p.finish());
    let out = dir.path().join("out");

    assert_eq!(convert(&source, &out)?, 1);
    assert_eq!(
        std::fs::read_to_string(out.join("000001.txt")).expect("read output"),
        "1.0 2.0 3.0 4.0 5.0 6.0 0.1 0.87\n"
    );
    Ok(())
}

#[test]
fn several_frames_share_one_memoized_dtype() -> Result<(), ConvertError> {
    let boxes: [[f32; 7]; 2] = [
        [10.5, -2.25, -0.8, 3.9, 1.6, 1.56, 1.5707964],
        [0.001, 40.0, -1.0, 0.8, 0.6, 1.7, -3.1415927],
    ];
    let mut p = Pickle::new();
    p.op(EMPTY_LIST).op(MARK);

    p.op(EMPTY_DICT).op(MARK);
    p.string("frame_id").string("000000");
    p.string("boxes_lidar")
        .ndarray(&[2, 7], |p| p.dtype("f4", -1, -1, 20), &f32_bytes(&boxes.concat()));
    p.string("score")
        .ndarray(&[2], |p| p.get(20), &f32_bytes(&[0.9731, 0.125]));
    p.op(SETITEMS);

    p.op(EMPTY_DICT).op(MARK);
    p.string("frame_id").string("000001");
    p.string("boxes_lidar").ndarray(&[0, 7], |p| p.get(20), b"");
    p.string("score").ndarray(&[0], |p| p.get(20), b"");
    p.op(SETITEMS);

    p.op(APPENDS);
    let dir = tempfile::tempdir().expect("tempdir");
    let source = write_source(&dir, &p.finish());
    let out = dir.path().join("out");

    let report = Converter::default().run(&source, &out, &mut NoopObserver)?;

    assert_eq!(report.frames_written, 2);
    assert_eq!(report.boxes_written, 2);
    assert_eq!(
        std::fs::read_to_string(out.join("000000.txt")).expect("read output"),
        "10.5 -2.25 -0.8 3.9 1.6 1.56 1.5707964 0.9731\n\
         0.001 40.0 -1.0 0.8 0.6 1.7 -3.1415927 0.125\n"
    );
    assert_eq!(
        std::fs::read_to_string(out.join("000001.txt")).expect("read output"),
        ""
    );
    Ok(())
}

#[test]
fn wrong_box_width_is_malformed() {
    let mut p = Pickle::new();
    p.op(EMPTY_LIST).op(MARK).op(EMPTY_DICT).op(MARK);
    p.string("frame_id").string("000002");
    p.string("boxes_lidar").ndarray(
        &[1, 6],
        |p| p.dtype("f4", -1, -1, 1),
        &f32_bytes(&[1.0; 6]),
    );
    p.string("score").ndarray(&[1], |p| p.get(1), &f32_bytes(&[0.5]));
    p.op(SETITEMS).op(APPENDS);
    let dir = tempfile::tempdir().expect("tempdir");
    let source = write_source(&dir, &p.finish());

    let err = convert(&source, &dir.path().join("out")).expect_err("six columns");

    assert_eq!(err.code(), "MALFORMED_RECORD");
    assert!(err.to_string().contains("box 0 has 6 values"), "{err}");
}
