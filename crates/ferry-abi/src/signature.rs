use serde::{Deserialize, Serialize};
use std::fmt;

/// Core WebAssembly value types used by the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasmType {
    I32,
    F64,
}

/// How one import parameter crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiParam {
    /// Plain i32 scalar.
    I32,
    /// Plain f64 scalar.
    F64,
    /// Borrowed object-table handle; the slot stays live.
    Handle,
    /// Owned handle; the slot is released after the call.
    OwnedHandle,
    /// UTF-8 text as `(ptr, len)`.
    Str,
    /// Raw bytes as `(ptr, len)`.
    Bytes,
}

impl AbiParam {
    /// The wasm parameters this ABI parameter lowers to.
    pub fn lowered(self) -> &'static [WasmType] {
        match self {
            Self::I32 | Self::Handle | Self::OwnedHandle => &[WasmType::I32],
            Self::F64 => &[WasmType::F64],
            Self::Str | Self::Bytes => &[WasmType::I32, WasmType::I32],
        }
    }
}

/// How an import's result crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiReturn {
    Unit,
    I32,
    F64,
    /// A freshly allocated, guest-owned handle.
    Handle,
    /// `(ptr, len)` written to the out-buffer.
    Str,
    /// `(ptr, len)` written to the out-buffer.
    Bytes,
    /// Presence flag + f64 written to the out-buffer.
    OptionalF64,
}

impl AbiReturn {
    /// Whether the result travels through a leading `retptr` parameter.
    pub fn uses_out_buffer(self) -> bool {
        matches!(self, Self::Str | Self::Bytes | Self::OptionalF64)
    }

    fn direct(self) -> Option<WasmType> {
        match self {
            Self::I32 | Self::Handle => Some(WasmType::I32),
            Self::F64 => Some(WasmType::F64),
            Self::Unit | Self::Str | Self::Bytes | Self::OptionalF64 => None,
        }
    }
}

/// Whether a host failure is reported to the guest or treated as a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    /// Failures are captured and signalled with a trailing status result.
    Fallible,
    /// Failures are logged and trap the guest.
    Logged,
}

/// The full encoding of one import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<AbiParam>,
    pub ret: AbiReturn,
    pub kind: DispatchKind,
}

/// A signature lowered to core wasm types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredType {
    pub params: Vec<WasmType>,
    pub results: Vec<WasmType>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<AbiParam>>, ret: AbiReturn, kind: DispatchKind) -> Self {
        Self {
            params: params.into(),
            ret,
            kind,
        }
    }

    pub fn fallible(params: impl Into<Vec<AbiParam>>, ret: AbiReturn) -> Self {
        Self::new(params, ret, DispatchKind::Fallible)
    }

    pub fn logged(params: impl Into<Vec<AbiParam>>, ret: AbiReturn) -> Self {
        Self::new(params, ret, DispatchKind::Logged)
    }

    /// Lower to the wasm function type the guest must import.
    ///
    /// `[retptr] params... -> [direct result] [status]`
    pub fn lower(&self) -> LoweredType {
        let mut params = Vec::new();
        if self.ret.uses_out_buffer() {
            params.push(WasmType::I32);
        }
        for p in &self.params {
            params.extend_from_slice(p.lowered());
        }

        let mut results = Vec::new();
        if let Some(ty) = self.ret.direct() {
            results.push(ty);
        }
        if self.kind == DispatchKind::Fallible {
            results.push(WasmType::I32);
        }
        LoweredType { params, results }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| format!("{p:?}")).collect();
        write!(f, "({}) -> {:?} [{:?}]", params.join(", "), self.ret, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallible_str_return_lowers_with_retptr_and_status() {
        let sig = Signature::fallible([AbiParam::Handle, AbiParam::Str], AbiReturn::Str);
        let lowered = sig.lower();
        assert_eq!(
            lowered.params,
            vec![WasmType::I32, WasmType::I32, WasmType::I32, WasmType::I32]
        );
        assert_eq!(lowered.results, vec![WasmType::I32]);
    }

    #[test]
    fn logged_handle_return_has_single_result() {
        let sig = Signature::logged([AbiParam::F64], AbiReturn::Handle);
        let lowered = sig.lower();
        assert_eq!(lowered.params, vec![WasmType::F64]);
        assert_eq!(lowered.results, vec![WasmType::I32]);
    }

    #[test]
    fn fallible_f64_return_keeps_value_before_status() {
        let sig = Signature::fallible([], AbiReturn::F64);
        assert_eq!(sig.lower().results, vec![WasmType::F64, WasmType::I32]);
    }

    #[test]
    fn logged_unit_has_no_results() {
        let sig = Signature::logged([AbiParam::OwnedHandle], AbiReturn::Unit);
        assert!(sig.lower().results.is_empty());
    }

    #[test]
    fn serializes_snake_case() {
        let sig = Signature::fallible([AbiParam::OwnedHandle], AbiReturn::OptionalF64);
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(
            json,
            r#"{"params":["owned_handle"],"ret":"optional_f64","kind":"fallible"}"#
        );
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
