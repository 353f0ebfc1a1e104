use std::sync::OnceLock;

/// Header byte marking a frame whose payload is stored uncompressed.
pub const STORED_FRAME: u8 = 0xFF;

/// Empirical byte frequencies of game traffic. The tree derived from this
/// table is part of the wire format and must never change.
#[allow(clippy::excessive_precision)]
const FREQUENCIES: [f32; 256] = [
    0.14473691, 0.01147017, 0.00167522, 0.03831121, 0.00356579, 0.03811315,
    0.00178254, 0.00199644, 0.00183511, 0.00225716, 0.00211240, 0.00308829,
    0.00172852, 0.00186608, 0.00215921, 0.00168891, 0.00168603, 0.00218586,
    0.00284414, 0.00161833, 0.00196043, 0.00151029, 0.00173932, 0.00218370,
    0.00934121, 0.00220530, 0.00381211, 0.00185456, 0.00194675, 0.00161977,
    0.00186680, 0.00182071, 0.06421956, 0.00537786, 0.00514019, 0.00487155,
    0.00493925, 0.00503143, 0.00514019, 0.00453520, 0.00454241, 0.00485642,
    0.00422407, 0.00593387, 0.00458130, 0.00343687, 0.00342823, 0.00531592,
    0.00324890, 0.00333388, 0.00308613, 0.00293776, 0.00258918, 0.00259278,
    0.00377105, 0.00267488, 0.00227516, 0.00415997, 0.00248763, 0.00301555,
    0.00220962, 0.00206990, 0.00270369, 0.00231694, 0.00273826, 0.00450928,
    0.00384380, 0.00504728, 0.00221251, 0.00376961, 0.00232990, 0.00312574,
    0.00291688, 0.00280236, 0.00252436, 0.00229461, 0.00294353, 0.00241201,
    0.00366590, 0.00199860, 0.00257838, 0.00225860, 0.00260646, 0.00187256,
    0.00266552, 0.00242641, 0.00219450, 0.00192082, 0.00182071, 0.02185930,
    0.00157439, 0.00164353, 0.00161401, 0.00187544, 0.00186248, 0.03338637,
    0.00186968, 0.00172132, 0.00148509, 0.00177749, 0.00144620, 0.00192442,
    0.00169683, 0.00209439, 0.00209439, 0.00259062, 0.00194531, 0.00182359,
    0.00159096, 0.00145196, 0.00128199, 0.00158376, 0.00171412, 0.00243433,
    0.00345704, 0.00156359, 0.00145700, 0.00157007, 0.00232342, 0.00154198,
    0.00140730, 0.00288807, 0.00152830, 0.00151246, 0.00250203, 0.00224420,
    0.00161761, 0.00714383, 0.08188576, 0.00802537, 0.00119484, 0.00123805,
    0.05632671, 0.00305156, 0.00105584, 0.00105368, 0.00099246, 0.00090459,
    0.00109473, 0.00115379, 0.00261223, 0.00105656, 0.00124381, 0.00100326,
    0.00127550, 0.00089739, 0.00162481, 0.00100830, 0.00097229, 0.00078864,
    0.00107240, 0.00084409, 0.00265760, 0.00116891, 0.00073102, 0.00075695,
    0.00093916, 0.00106880, 0.00086786, 0.00185600, 0.00608367, 0.00133600,
    0.00075695, 0.00122077, 0.00566955, 0.00108249, 0.00259638, 0.00077063,
    0.00166586, 0.00090387, 0.00087074, 0.00084914, 0.00130935, 0.00162409,
    0.00085922, 0.00093340, 0.00093844, 0.00087722, 0.00108249, 0.00098598,
    0.00095933, 0.00427593, 0.00496661, 0.00102775, 0.00159312, 0.00118404,
    0.00114947, 0.00104936, 0.00154342, 0.00140082, 0.00115883, 0.00110769,
    0.00161112, 0.00169107, 0.00107816, 0.00142747, 0.00279804, 0.00085922,
    0.00116315, 0.00119484, 0.00128559, 0.00146204, 0.00130215, 0.00101551,
    0.00091756, 0.00161184, 0.00236375, 0.00131872, 0.00214120, 0.00088875,
    0.00138570, 0.00211960, 0.00094060, 0.00088083, 0.00094564, 0.00090243,
    0.00106160, 0.00088659, 0.00114514, 0.00095861, 0.00108753, 0.00124165,
    0.00427016, 0.00159384, 0.00170547, 0.00104431, 0.00091395, 0.00095789,
    0.00134681, 0.00095213, 0.00105944, 0.00094132, 0.00141883, 0.00102127,
    0.00101911, 0.00082105, 0.00158448, 0.00102631, 0.00087938, 0.00139290,
    0.00114658, 0.00095501, 0.00161329, 0.00126542, 0.00113218, 0.00123661,
    0.00101695, 0.00112930, 0.00317976, 0.00085346, 0.00101190, 0.00189849,
    0.00105728, 0.00186824, 0.00092908, 0.00160896,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HuffmanError {
    #[error("empty frame")]
    Empty,
    #[error("invalid pad count {0}")]
    InvalidPadding(u8),
    #[error("bit stream ends inside a code")]
    Truncated,
}

#[derive(Debug, Clone, Copy, Default)]
struct Code {
    bits: u32,
    len: u8,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(u8),
    Branch { zero: usize, one: usize },
}

/// Static prefix code. Frames are `[pad count][bits]`, bits packed
/// least-significant first within each byte and each code written
/// most-significant bit first, or `[0xFF][raw bytes]` when coding would not
/// shrink the input.
#[derive(Debug)]
pub struct HuffmanCodec {
    nodes: Vec<Node>,
    root: usize,
    codes: [Code; 256],
}

impl Default for HuffmanCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HuffmanCodec {
    pub fn new() -> Self {
        Self::from_frequencies(&FREQUENCIES)
    }

    pub fn from_frequencies(frequencies: &[f32; 256]) -> Self {
        let mut nodes: Vec<Node> = (0..=255u8).map(Node::Leaf).collect();
        let mut work: [Option<(usize, f32)>; 256] =
            std::array::from_fn(|i| Some((i, frequencies[i])));
        let mut root = 0;

        // Repeatedly join the two rarest subtrees. Ties resolve to the lowest
        // index, which keeps the tree identical on every peer.
        for _ in 0..255 {
            let mut min1 = 1e30f32;
            let mut min2 = 1e30f32;
            let mut at1 = None;
            let mut at2 = None;

            for (j, slot) in work.iter().enumerate() {
                let Some((_, freq)) = *slot else {
                    continue;
                };
                if freq < min1 {
                    at2 = at1;
                    min2 = min1;
                    at1 = Some(j);
                    min1 = freq;
                } else if freq < min2 {
                    at2 = Some(j);
                    min2 = freq;
                }
            }

            let (Some(at1), Some(at2)) = (at1, at2) else {
                break;
            };
            let (Some((one, one_freq)), Some((zero, zero_freq))) = (work[at1], work[at2]) else {
                break;
            };

            nodes.push(Node::Branch { zero, one });
            root = nodes.len() - 1;
            work[at1] = Some((root, zero_freq + one_freq));
            work[at2] = None;
        }

        let mut codes = [Code::default(); 256];
        let mut stack = vec![(root, 0u8, 0u32)];
        while let Some((index, len, bits)) = stack.pop() {
            match nodes[index] {
                Node::Leaf(value) => codes[value as usize] = Code { bits, len },
                Node::Branch { zero, one } => {
                    debug_assert!(len < 32, "code longer than 32 bits");
                    stack.push((zero, len + 1, bits << 1));
                    stack.push((one, len + 1, (bits << 1) | 1));
                }
            }
        }

        Self { nodes, root, codes }
    }

    pub fn code_len(&self, byte: u8) -> u8 {
        self.codes[byte as usize].len
    }

    /// Never returns more than `input.len() + 1` bytes.
    pub fn encode(&self, input: &[u8]) -> Vec<u8> {
        let total_bits: usize = input
            .iter()
            .map(|&b| self.codes[b as usize].len as usize)
            .sum();
        let out_len = 1 + total_bits.div_ceil(8);

        if out_len >= input.len() + 1 {
            return Self::store(input);
        }

        let mut out = vec![0u8; out_len];
        out[0] = (8 * (out_len - 1) - total_bits) as u8;

        let payload = &mut out[1..];
        let mut bit_at = 0usize;
        for &byte in input {
            let code = self.codes[byte as usize];
            for i in 0..code.len {
                if (code.bits >> (code.len - 1 - i)) & 1 == 1 {
                    let pos = bit_at + i as usize;
                    payload[pos / 8] |= 1 << (pos % 8);
                }
            }
            bit_at += code.len as usize;
        }

        out
    }

    /// Frames `input` without compressing it.
    pub fn store(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + 1);
        out.push(STORED_FRAME);
        out.extend_from_slice(input);
        out
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Vec<u8>, HuffmanError> {
        let (&header, payload) = frame.split_first().ok_or(HuffmanError::Empty)?;

        if header == STORED_FRAME {
            return Ok(payload.to_vec());
        }
        if header > 7 {
            return Err(HuffmanError::InvalidPadding(header));
        }

        let total_bits = (payload.len() * 8)
            .checked_sub(header as usize)
            .ok_or(HuffmanError::InvalidPadding(header))?;

        let mut out = Vec::with_capacity(payload.len() * 2);
        let mut bit = 0usize;
        while bit < total_bits {
            let mut index = self.root;
            loop {
                match self.nodes[index] {
                    Node::Leaf(value) => {
                        out.push(value);
                        break;
                    }
                    Node::Branch { zero, one } => {
                        if bit >= total_bits {
                            return Err(HuffmanError::Truncated);
                        }
                        let set = payload[bit / 8] & (1 << (bit % 8)) != 0;
                        index = if set { one } else { zero };
                        bit += 1;
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Process-wide codec, built on first use.
pub fn codec() -> &'static HuffmanCodec {
    static CODEC: OnceLock<HuffmanCodec> = OnceLock::new();
    CODEC.get_or_init(HuffmanCodec::new)
}

pub fn encode(input: &[u8]) -> Vec<u8> {
    codec().encode(input)
}

pub fn decode(frame: &[u8]) -> Result<Vec<u8>, HuffmanError> {
    codec().decode(frame)
}
