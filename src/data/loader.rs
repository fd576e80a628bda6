use std::ffi::{c_char, c_int, CStr, CString};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::ptr;

use fitsio::errors::check_status;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use ndarray::{ArrayD, IxDyn};

use crate::error::{FitsError, FitsResult};
use crate::fits::hdu::is_structural;
use crate::fits::{Card, FitsFile, Hdu, Header, HeaderValue, KeywordProvider};

/// Buffer length for one header record plus its NUL terminator.
const FLEN_CARD: usize = 81;

/// cfitsio status when a keyword is not in the header.
const KEY_NO_EXIST: c_int = 202;

/// Negative decimals make cfitsio write reals in %G form with this many digits.
const REAL_DECIMALS: c_int = -15;

/// Deflate does not compress better than about 1032:1.
const MAX_DEFLATE_RATIO: u64 = 1032;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Plain,
    Gzip,
}

/// Pick the encoding from the file name: `.fits`, `.fit`, `.fts`, each
/// optionally followed by `.gz`.
fn encoding_for(path: &Path) -> FitsResult<Encoding> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (stem, encoding) = match name.strip_suffix(".gz") {
        Some(stem) => (stem, Encoding::Gzip),
        None => (name.as_str(), Encoding::Plain),
    };
    match stem.rsplit_once('.').map(|(_, ext)| ext) {
        Some("fits" | "fit" | "fts") => Ok(encoding),
        _ => Err(FitsError::invalid_format(format!(
            "Unsupported file extension: {name}"
        ))),
    }
}

/// Open a FITS file from disk. cfitsio inflates `.gz` files on open.
pub fn load_file(path: &Path) -> FitsResult<FitsFile> {
    let encoding = encoding_for(path)?;
    let budget = data_budget(fs::metadata(path)?.len(), encoding);
    debug!("reading {} ({encoding:?})", path.display());

    let mut fptr = fitsio::FitsFile::open(path)?;
    let count = fptr.iter().count();
    let mut hdus = Vec::with_capacity(count);
    for index in 0..count {
        let hdu = fptr.hdu(index)?;
        let header = read_header(&mut fptr)?;
        let data = match &hdu.info {
            HduInfo::ImageInfo { .. } => read_data(&hdu, &mut fptr, &header, budget)?,
            _ => None,
        };
        hdus.push(Hdu::from_parts(header, data));
    }

    Ok(FitsFile::read_from(path, hdus))
}

/// Write a FITS file to disk, compressing when the name ends in `.gz`.
///
/// A file read from disk is copied and only its modified keywords are
/// rewritten; data units are never re-encoded. A file built in memory is
/// created from scratch with 32-bit float images.
pub fn save_file(path: &Path, fits: &FitsFile) -> FitsResult<()> {
    let encoding = encoding_for(path)?;
    let working = working_path(path);
    debug!("writing {} ({encoding:?}) via {}", path.display(), working.display());

    let result = match fits.source() {
        Some(source) => copy_source(source, &working).and_then(|()| update_headers(&working, fits)),
        None => create_from_model(&working, fits),
    }
    .and_then(|()| publish(&working, path, encoding));

    if result.is_err() && working.exists() {
        fs::remove_file(&working).ok();
    }
    result
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Upper bound on the bytes a data unit can occupy in a file of `file_len`.
fn data_budget(file_len: u64, encoding: Encoding) -> u64 {
    match encoding {
        Encoding::Plain => file_len,
        Encoding::Gzip => file_len.saturating_mul(MAX_DEFLATE_RATIO),
    }
}

/// Pixels in a data unit with `axes`, refusing sizes the file cannot hold.
fn pixel_count(axes: &[usize], bitpix: i64, budget: u64) -> FitsResult<usize> {
    let count = axes.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n));
    let bytes = count.and_then(|n| u64::try_from(n).ok()?.checked_mul(bitpix.unsigned_abs() / 8));
    match (count, bytes) {
        (Some(count), Some(bytes)) if bytes <= budget => Ok(count),
        _ => Err(FitsError::invalid_format(format!(
            "data unit {axes:?} with BITPIX {bitpix} does not fit in the file"
        ))),
    }
}

/// Read the image of the current HDU. cfitsio applies BSCALE/BZERO.
fn read_data(
    hdu: &FitsHdu,
    fptr: &mut fitsio::FitsFile,
    header: &Header,
    budget: u64,
) -> FitsResult<Option<ArrayD<f64>>> {
    let axes = header.axes();
    if axes.is_empty() {
        return Ok(None);
    }
    let bitpix = header
        .get_int("BITPIX")
        .ok_or_else(|| FitsError::missing_keyword("BITPIX"))?;
    let len = pixel_count(&axes, bitpix, budget)?;

    let values: Vec<f64> = if len == 0 {
        Vec::new()
    } else {
        hdu.read_image(fptr)?
    };
    let shape: Vec<usize> = axes.iter().rev().copied().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map(Some)
        .map_err(|_| FitsError::ShapeMismatch { shape, len })
}

/// Every record of the current HDU, in order. CONTINUE records are folded
/// into the long string they extend.
fn read_header(fptr: &mut fitsio::FitsFile) -> FitsResult<Header> {
    let mut status = 0;
    let (mut count, mut more) = (0, 0);
    unsafe { fitsio_sys::ffghsp(fptr.as_raw(), &mut count, &mut more, &mut status) };
    check_status(status)?;

    let mut header = Header::new();
    for n in 1..=count {
        let mut name = [0 as c_char; FLEN_CARD];
        let mut value = [0 as c_char; FLEN_CARD];
        let mut comment = [0 as c_char; FLEN_CARD];
        unsafe {
            fitsio_sys::ffgkyn(
                fptr.as_raw(),
                n,
                name.as_mut_ptr(),
                value.as_mut_ptr(),
                comment.as_mut_ptr(),
                &mut status,
            )
        };
        check_status(status)?;

        let key = buffer_text(&name);
        let value = buffer_text(&value);
        let comment = Some(buffer_text(&comment)).filter(|c| !c.is_empty());
        match key.as_str() {
            "CONTINUE" => continue,
            "" if comment.is_none() => continue,
            "COMMENT" | "HISTORY" | "" => {
                header.push(Card { key, value: None, comment });
                continue;
            }
            _ => {}
        }

        let value = if value.is_empty() {
            None
        } else {
            Some(parse_value(fptr, &key, &value)?)
        };
        header.push(Card { key, value, comment });
    }
    Ok(header)
}

fn parse_value(fptr: &mut fitsio::FitsFile, key: &str, text: &str) -> FitsResult<HeaderValue> {
    let field = c_string(text)?;
    let mut kind: c_char = 0;
    let mut status = 0;
    unsafe { fitsio_sys::ffdtyp(field.as_ptr(), &mut kind, &mut status) };
    check_status(status)?;

    Ok(match kind as u8 {
        b'C' => HeaderValue::String(read_long_string(fptr, key)?),
        b'L' => HeaderValue::Logical(text.trim() == "T"),
        _ => parse_number(text),
    })
}

fn parse_number(text: &str) -> HeaderValue {
    let token = text.trim();
    token
        .parse::<i64>()
        .map(HeaderValue::Integer)
        .or_else(|_| token.replace(['D', 'd'], "E").parse::<f64>().map(HeaderValue::Real))
        .unwrap_or_else(|_| HeaderValue::String(token.to_string()))
}

/// String value of `key`, following the CONTINUE long-string convention.
fn read_long_string(fptr: &mut fitsio::FitsFile, key: &str) -> FitsResult<String> {
    let name = c_string(key)?;
    let mut text: *mut c_char = ptr::null_mut();
    let mut comment = [0 as c_char; FLEN_CARD];
    let mut status = 0;
    unsafe {
        fitsio_sys::ffgkls(
            fptr.as_raw(),
            name.as_ptr(),
            &mut text,
            comment.as_mut_ptr(),
            &mut status,
        )
    };
    check_status(status)?;
    if text.is_null() {
        return Ok(String::new());
    }

    let value = unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned();
    unsafe { fitsio_sys::fffree(text.cast(), &mut status) };
    check_status(status)?;
    Ok(value)
}

fn buffer_text(buffer: &[c_char]) -> String {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Uncompressed scratch file next to `path`; cfitsio cannot edit `.gz` files.
fn working_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".gz")
        .or_else(|| name.strip_suffix(".GZ"))
        .unwrap_or(&name);
    path.with_file_name(format!(".{stem}.part"))
}

fn copy_source(source: &Path, working: &Path) -> FitsResult<()> {
    match encoding_for(source)? {
        Encoding::Plain => {
            fs::copy(source, working)?;
        }
        Encoding::Gzip => {
            let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
            let mut output = BufWriter::new(File::create(working)?);
            io::copy(&mut decoder, &mut output)?;
            output.flush()?;
        }
    }
    Ok(())
}

fn update_headers(working: &Path, fits: &FitsFile) -> FitsResult<()> {
    let mut fptr = fitsio::FitsFile::edit(working)?;
    for (index, hdu) in fits.iter().enumerate() {
        let header = hdu.header();
        let modified: Vec<&str> = header.modified().collect();
        if modified.is_empty() {
            continue;
        }

        fptr.hdu(index)?;
        for key in &modified {
            match header.card(key) {
                Some(card) => write_card(&mut fptr, card)?,
                None => delete_key(&mut fptr, key)?,
            }
        }
        debug!("HDU {index}: updated {}", modified.join(", "));
    }
    Ok(())
}

fn create_from_model(working: &Path, fits: &FitsFile) -> FitsResult<()> {
    let Some((primary, extensions)) = fits.hdus().split_first() else {
        return Err(FitsError::invalid_format("nothing to write: no HDUs"));
    };

    let shape = primary.shape().unwrap_or_default().to_vec();
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &shape,
    };
    let mut fptr = fitsio::FitsFile::create(working)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    if let Some(data) = primary.data() {
        let image = fptr.hdu(0)?;
        write_data(&image, &mut fptr, data)?;
    }
    write_cards(&mut fptr, primary.header())?;

    for hdu in extensions {
        let shape = hdu.shape().unwrap_or_default().to_vec();
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &shape,
        };
        let image = fptr.create_image(hdu.extname().unwrap_or_default(), &description)?;
        if let Some(data) = hdu.data() {
            write_data(&image, &mut fptr, data)?;
        }
        if hdu.extname().is_none() {
            delete_key(&mut fptr, "EXTNAME")?;
        }
        write_cards(&mut fptr, hdu.header())?;
    }
    Ok(())
}

fn write_data(image: &FitsHdu, fptr: &mut fitsio::FitsFile, data: &ArrayD<f64>) -> FitsResult<()> {
    let values: Vec<f64> = data.iter().copied().collect();
    if !values.is_empty() {
        image.write_image(fptr, &values)?;
    }
    Ok(())
}

/// Non-structural cards of `header` into the current HDU.
fn write_cards(fptr: &mut fitsio::FitsFile, header: &Header) -> FitsResult<()> {
    header
        .cards()
        .iter()
        .filter(|card| !is_structural(&card.key))
        .try_for_each(|card| write_card(fptr, card))
}

/// Update or append one card. Strings longer than a record are continued
/// over CONTINUE records by cfitsio.
fn write_card(fptr: &mut fitsio::FitsFile, card: &Card) -> FitsResult<()> {
    let Some(value) = &card.value else {
        return write_commentary(fptr, card);
    };
    let key = c_string(&card.key)?;
    let comment = card.comment.as_deref().map(c_string).transpose()?;
    let comment = comment.as_ref().map_or(ptr::null(), |c| c.as_ptr());

    let mut status = 0;
    match value {
        HeaderValue::String(text) => {
            let text = c_string(text)?;
            unsafe {
                fitsio_sys::ffukls(fptr.as_raw(), key.as_ptr(), text.as_ptr(), comment, &mut status)
            }
        }
        HeaderValue::Integer(i) => unsafe {
            fitsio_sys::ffukyj(fptr.as_raw(), key.as_ptr(), *i, comment, &mut status)
        },
        HeaderValue::Real(r) => unsafe {
            fitsio_sys::ffukyd(fptr.as_raw(), key.as_ptr(), *r, REAL_DECIMALS, comment, &mut status)
        },
        HeaderValue::Logical(b) => unsafe {
            fitsio_sys::ffukyl(fptr.as_raw(), key.as_ptr(), c_int::from(*b), comment, &mut status)
        },
    };
    check_status(status)?;
    Ok(())
}

fn write_commentary(fptr: &mut fitsio::FitsFile, card: &Card) -> FitsResult<()> {
    let text = c_string(card.comment.as_deref().unwrap_or(""))?;
    let mut status = 0;
    match card.key.as_str() {
        "COMMENT" => unsafe { fitsio_sys::ffpcom(fptr.as_raw(), text.as_ptr(), &mut status) },
        "HISTORY" => unsafe { fitsio_sys::ffphis(fptr.as_raw(), text.as_ptr(), &mut status) },
        other => {
            debug!("dropping commentary card {other:?}");
            return Ok(());
        }
    };
    check_status(status)?;
    Ok(())
}

fn delete_key(fptr: &mut fitsio::FitsFile, key: &str) -> FitsResult<()> {
    let name = c_string(key)?;
    let mut status = 0;
    unsafe { fitsio_sys::ffdkey(fptr.as_raw(), name.as_ptr(), &mut status) };
    if status == KEY_NO_EXIST {
        return Ok(());
    }
    check_status(status)?;
    Ok(())
}

/// Move the finished working file to `path`, gzipping on the way if asked.
fn publish(working: &Path, path: &Path, encoding: Encoding) -> FitsResult<()> {
    match encoding {
        Encoding::Plain => fs::rename(working, path)?,
        Encoding::Gzip => {
            let mut input = BufReader::new(File::open(working)?);
            let mut encoder =
                GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            fs::remove_file(working)?;
        }
    }
    Ok(())
}

/// Header text is ASCII; anything else becomes `?`.
fn c_string(text: &str) -> FitsResult<CString> {
    let ascii: String = text
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect();
    CString::new(ascii).map_err(|_| FitsError::invalid_format(format!("NUL byte in {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn sample_file() -> FitsFile {
        let mut primary = Header::new();
        primary.set("TELESCOP", "APO 2.5m");
        primary.push(Card::commentary("HISTORY", "synthetic"));
        let mut flux = Header::new();
        flux.set("EXTNAME", "FLUX");
        flux.set("CTYPE3", "WAVE");
        flux.set("CRVAL3", 1.9005);
        flux.set("CRPIX3", 1i64);
        let data = ArrayD::from_shape_fn(IxDyn(&[5, 3, 2]), |i| (i[0] * 100 + i[1] * 10 + i[2]) as f64);
        let mut unnamed = Header::new();
        unnamed.set("BUNIT", "Counts");

        FitsFile::from_hdus(vec![
            Hdu::primary(primary, None),
            Hdu::image_extension(flux, data),
            Hdu::image_extension(unnamed, ArrayD::zeros(IxDyn(&[4]))),
        ])
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ifucube-loader-{}-{name}", std::process::id()))
    }

    /// One 2880 byte header block holding `cards` and END.
    fn header_block(cards: &[(&str, &str)]) -> Vec<u8> {
        let mut text: String = cards
            .iter()
            .map(|(key, value)| format!("{key:<8}= {value:>20}{:50}", ""))
            .collect();
        text.push_str(&format!("{:<80}", "END"));
        format!("{text:<2880}").into_bytes()
    }

    #[test]
    fn test_file_roundtrip() {
        let path = temp_path("roundtrip.fits");
        save_file(&path, &sample_file()).unwrap();
        let loaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.source(), Some(path.as_path()));
        let primary = loaded.get(0).unwrap();
        assert!(primary.data().is_none());
        assert_eq!(primary.header().get_string("TELESCOP").as_deref(), Some("APO 2.5m"));
        assert!(primary
            .header()
            .cards()
            .iter()
            .any(|c| c.key == "HISTORY" && c.comment.as_deref() == Some("synthetic")));

        let flux = loaded.get(1).unwrap();
        assert_eq!(flux.extname(), Some("FLUX"));
        assert_eq!(flux.shape(), Some(&[5, 3, 2][..]));
        assert_eq!(flux.data().unwrap()[&[4, 2, 1][..]], 421.0);
        assert_eq!(flux.header().get_float("CRVAL3"), Some(1.9005));
        assert_eq!(flux.header().get_int("CRPIX3"), Some(1));
        assert_eq!(flux.header().modified().count(), 0);

        let unnamed = loaded.get(2).unwrap();
        assert_eq!(unnamed.extname(), None);
        assert_eq!(unnamed.shape(), Some(&[4][..]));
    }

    #[test]
    fn test_gzip_file_roundtrip() {
        let path = temp_path("roundtrip.fits.gz");
        save_file(&path, &sample_file()).unwrap();
        let loaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 3);
        assert!(crate::data::filter::is_cube(loaded.get(1).unwrap()));
        assert!(!working_path(&path).exists());
    }

    #[test]
    fn test_saving_loaded_file_rewrites_modified_keys_only() {
        let original = temp_path("edit-source.fits");
        let edited = temp_path("edit-target.fits.gz");
        save_file(&original, &sample_file()).unwrap();

        let mut fits = load_file(&original).unwrap();
        let header = fits.hdus_mut()[1].header_mut();
        header.set("CTYPE3", "AWAV");
        header.set("CUNIT3", "um");
        header.remove("CRPIX3");
        save_file(&edited, &fits).unwrap();

        let reloaded = load_file(&edited).unwrap();
        std::fs::remove_file(&original).ok();
        std::fs::remove_file(&edited).ok();

        let flux = reloaded.get(1).unwrap().header();
        assert_eq!(flux.get_string("CTYPE3").as_deref(), Some("AWAV"));
        assert_eq!(flux.get_string("CUNIT3").as_deref(), Some("um"));
        assert!(!flux.contains("CRPIX3"));
        assert_eq!(flux.get_float("CRVAL3"), Some(1.9005));
        assert_eq!(flux.cards().iter().filter(|c| c.key == "CTYPE3").count(), 1);
        assert_eq!(
            reloaded.get(1).unwrap().data(),
            fits.get(1).unwrap().data()
        );
    }

    #[test]
    fn test_in_place_save() {
        let path = temp_path("in-place.fits");
        save_file(&path, &sample_file()).unwrap();

        let mut fits = load_file(&path).unwrap();
        fits.hdus_mut()[2].header_mut().set("EXTNAME", "IVAR");
        save_file(&path, &fits).unwrap();
        let reloaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.get(2).unwrap().extname(), Some("IVAR"));
        assert_eq!(reloaded.get(1).unwrap().extname(), Some("FLUX"));
    }

    #[test]
    fn test_long_string_values_survive() {
        let name = format!("{}_1", "X".repeat(70));
        assert_eq!(name.len(), 72);
        let mut header = Header::new();
        header.set("EXTNAME", name.as_str());
        let fits = FitsFile::from_hdus(vec![
            Hdu::primary(Header::new(), None),
            Hdu::image_extension(header, ArrayD::zeros(IxDyn(&[2, 2, 2]))),
        ]);

        let path = temp_path("long-string.fits");
        save_file(&path, &fits).unwrap();
        let mut loaded = load_file(&path).unwrap();
        assert_eq!(loaded.get(1).unwrap().extname(), Some(name.as_str()));

        let longer = format!("{name}_{}", "Y".repeat(100));
        loaded.hdus_mut()[1].header_mut().set("EXTNAME", longer.as_str());
        save_file(&path, &loaded).unwrap();
        let reloaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.get(1).unwrap().extname(), Some(longer.as_str()));
    }

    #[test]
    fn test_refuses_oversized_data_unit() {
        let path = temp_path("oversized.fits");
        let block = header_block(&[
            ("SIMPLE", "T"),
            ("BITPIX", "64"),
            ("NAXIS", "1"),
            ("NAXIS1", "2305843009213693952"),
        ]);
        std::fs::write(&path, block).unwrap();
        let result = load_file(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }

    #[test]
    fn test_pixel_count_guards() {
        assert_eq!(pixel_count(&[17, 17, 2048], -32, 17 * 17 * 2048 * 4).unwrap(), 17 * 17 * 2048);
        assert!(matches!(
            pixel_count(&[1 << 61], 64, u64::MAX),
            Err(FitsError::InvalidFormat(_))
        ));
        assert!(matches!(
            pixel_count(&[usize::MAX, 2], 8, u64::MAX),
            Err(FitsError::InvalidFormat(_))
        ));
        assert!(pixel_count(&[100], -64, 799).is_err());
        assert_eq!(data_budget(10, Encoding::Gzip), 10 * MAX_DEFLATE_RATIO);
        assert_eq!(data_budget(u64::MAX, Encoding::Gzip), u64::MAX);
    }

    #[test]
    fn test_rejects_non_fits_file() {
        let path = temp_path("not-fits.fits");
        std::fs::write(&path, b"hello").unwrap();
        let result = load_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());

        let err = load_file(&temp_path("absent.fits")).unwrap_err();
        assert!(matches!(err, FitsError::Io(_)));
    }

    #[test]
    fn test_header_values_are_typed() {
        assert_eq!(parse_number("  2048"), HeaderValue::Integer(2048));
        assert_eq!(parse_number("1.0D-03"), HeaderValue::Real(1.0e-3));
        assert_eq!(parse_number("(1.0, 2.0)"), HeaderValue::String("(1.0, 2.0)".to_string()));
        assert_eq!(buffer_text(&[b'A' as c_char, b' ' as c_char, 0, b'B' as c_char]), "A");
    }

    #[test]
    fn test_encoding_dispatch() {
        assert_eq!(encoding_for(Path::new("cube.fits")).unwrap(), Encoding::Plain);
        assert_eq!(encoding_for(Path::new("cube.FITS.gz")).unwrap(), Encoding::Gzip);
        assert!(encoding_for(Path::new("cube.csv")).is_err());
        assert!(encoding_for(Path::new("cube.gz")).is_err());
        assert_eq!(
            working_path(Path::new("/tmp/cube.fits.gz")),
            PathBuf::from("/tmp/.cube.fits.part")
        );
    }
}
