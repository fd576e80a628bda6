use ndarray::ArrayD;

use super::header::{Card, Header, HeaderValue};

/// BITPIX of images built in memory; cube data is written as 32-bit floats.
pub const FLOAT_BITPIX: i64 = -32;

/// Keywords that describe the data layout rather than the data.
const STRUCTURAL: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "PCOUNT", "GCOUNT", "EXTEND", "BSCALE", "BZERO",
];

/// True for layout keywords cfitsio writes itself when an image is created.
pub fn is_structural(key: &str) -> bool {
    STRUCTURAL.contains(&key)
        || key
            .strip_prefix("NAXIS")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Hdu – one header/data unit
// ---------------------------------------------------------------------------

/// A header plus its image, scaled to physical values.
///
/// Tables and other non-image HDUs keep their header only.
#[derive(Debug, Clone)]
pub struct Hdu {
    header: Header,
    data: Option<ArrayD<f64>>,
}

impl Hdu {
    /// Build a primary HDU, optionally carrying an image.
    pub fn primary(header: Header, data: Option<ArrayD<f64>>) -> Self {
        Self::build(false, header, data)
    }

    /// Build an IMAGE extension.
    pub fn image_extension(header: Header, data: ArrayD<f64>) -> Self {
        Self::build(true, header, Some(data))
    }

    fn build(extension: bool, extra: Header, data: Option<ArrayD<f64>>) -> Self {
        let shape: Vec<usize> = data.as_ref().map(|d| d.shape().to_vec()).unwrap_or_default();

        let mut header = Header::new();
        if extension {
            header.push(Card::new("XTENSION", "IMAGE").with_comment("Image extension"));
        } else {
            header.push(Card::new("SIMPLE", true).with_comment("conforms to FITS standard"));
        }
        header.push(Card::new("BITPIX", FLOAT_BITPIX).with_comment("array data type"));
        header.push(Card::new("NAXIS", shape.len()).with_comment("number of array dimensions"));
        for (i, len) in shape.iter().rev().enumerate() {
            header.push(Card::new(format!("NAXIS{}", i + 1), *len));
        }
        if extension {
            header.push(Card::new("PCOUNT", 0i64));
            header.push(Card::new("GCOUNT", 1i64));
        } else {
            header.push(Card::new("EXTEND", true));
        }
        for card in extra.cards() {
            if !is_structural(&card.key) {
                header.push(card.clone());
            }
        }

        Self { header, data }
    }

    /// An HDU as read from a file.
    pub(crate) fn from_parts(header: Header, data: Option<ArrayD<f64>>) -> Self {
        Self { header, data }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn data(&self) -> Option<&ArrayD<f64>> {
        self.data.as_ref()
    }

    /// Array shape, slowest axis first.
    pub fn shape(&self) -> Option<&[usize]> {
        self.data.as_ref().map(|d| d.shape())
    }

    pub fn extname(&self) -> Option<&str> {
        self.header.get("EXTNAME").and_then(HeaderValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_structural_keys() {
        assert!(is_structural("NAXIS3"));
        assert!(is_structural("BZERO"));
        assert!(!is_structural("NAXISX"));
        assert!(!is_structural("EXTNAME"));
    }

    #[test]
    fn test_image_extension_structure() {
        let mut extra = Header::new();
        extra.set("EXTNAME", "FLUX");
        extra.set("NAXIS", 99i64);
        let hdu = Hdu::image_extension(extra, ArrayD::zeros(IxDyn(&[4, 3, 2])));

        let header = hdu.header();
        assert_eq!(header.cards()[0].key, "XTENSION");
        assert_eq!(header.axes(), vec![2, 3, 4]);
        assert_eq!(hdu.extname(), Some("FLUX"));
        assert_eq!(hdu.shape(), Some(&[4, 3, 2][..]));
    }

    #[test]
    fn test_primary_without_data() {
        let hdu = Hdu::primary(Header::new(), None);
        assert_eq!(hdu.header().cards()[0].key, "SIMPLE");
        assert!(hdu.header().axes().is_empty());
        assert!(hdu.shape().is_none());
    }
}
