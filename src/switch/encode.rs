//! JSON has no infinities, so log-weights are written as numbers when finite and as
//! the strings "-inf", "inf" or "nan" otherwise. A classifier with no posterior mass
//! sits at -inf, and a checkpoint must restore it as such.

use nalgebra::{DMatrix, DVector};
use serde::{Serialize, Deserialize, Serializer, Deserializer};
use serde::de::Error;

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LogWeight {
    Finite(f64),
    Special(String)
}

fn encode(v : f64) -> LogWeight {
    if v.is_finite() {
        LogWeight::Finite(v)
    } else if v.is_nan() {
        LogWeight::Special(String::from("nan"))
    } else if v > 0.0 {
        LogWeight::Special(String::from("inf"))
    } else {
        LogWeight::Special(String::from("-inf"))
    }
}

fn decode<E : Error>(w : LogWeight) -> Result<f64, E> {
    match w {
        LogWeight::Finite(v) => Ok(v),
        LogWeight::Special(s) => match &s[..] {
            "-inf" => Ok(f64::NEG_INFINITY),
            "inf" => Ok(f64::INFINITY),
            "nan" => Ok(f64::NAN),
            other => Err(E::custom(format!("invalid log-weight {:?}", other)))
        }
    }
}

fn encode_all(values : &[f64]) -> Vec<LogWeight> {
    values.iter().map(|v| encode(*v) ).collect()
}

fn decode_all<E : Error>(weights : Vec<LogWeight>) -> Result<Vec<f64>, E> {
    weights.into_iter().map(decode).collect()
}

/// Plain vector of values.
pub mod values {

    use super::*;

    pub fn serialize<S>(values : &[f64], serializer : S) -> Result<S::Ok, S::Error>
    where
        S : Serializer
    {
        encode_all(values).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer : D) -> Result<Vec<f64>, D::Error>
    where
        D : Deserializer<'de>
    {
        decode_all(Vec::<LogWeight>::deserialize(deserializer)?)
    }

}

/// Column vector, written as a flat list.
pub mod vector {

    use super::*;

    pub fn serialize<S>(v : &DVector<f64>, serializer : S) -> Result<S::Ok, S::Error>
    where
        S : Serializer
    {
        encode_all(v.as_slice()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer : D) -> Result<DVector<f64>, D::Error>
    where
        D : Deserializer<'de>
    {
        let data = decode_all::<D::Error>(Vec::<LogWeight>::deserialize(deserializer)?)?;
        Ok(DVector::from_vec(data))
    }

}

#[derive(Serialize, Deserialize)]
struct EncodedMatrix {
    nrows : usize,
    ncols : usize,

    /// Column-major.
    data : Vec<LogWeight>
}

/// Optional matrix, written as its dimensions and column-major entries.
pub mod matrix_opt {

    use super::*;

    pub fn serialize<S>(m : &Option<DMatrix<f64>>, serializer : S) -> Result<S::Ok, S::Error>
    where
        S : Serializer
    {
        let encoded = m.as_ref().map(|m| EncodedMatrix {
            nrows : m.nrows(),
            ncols : m.ncols(),
            data : encode_all(m.as_slice())
        });
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer : D) -> Result<Option<DMatrix<f64>>, D::Error>
    where
        D : Deserializer<'de>
    {
        match Option::<EncodedMatrix>::deserialize(deserializer)? {
            Some(enc) => {
                if enc.data.len() != enc.nrows * enc.ncols {
                    let msg = format!("{} entries for a {}x{} matrix", enc.data.len(), enc.nrows, enc.ncols);
                    return Err(D::Error::custom(msg));
                }
                let data = decode_all::<D::Error>(enc.data)?;
                Ok(Some(DMatrix::from_vec(enc.nrows, enc.ncols, data)))
            },
            None => Ok(None)
        }
    }

}
