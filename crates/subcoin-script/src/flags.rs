use bitflags::bitflags;

bitflags! {
    /// Script verification flags.
    ///
    /// Only the consensus flags exposed by the verification interface are modelled here, the
    /// values match `SCRIPT_VERIFY_*` in Bitcoin Core so the raw bitfield can cross a library
    /// boundary unchanged.
    ///
    /// https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/script/interpreter.h#L45
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScriptFlags: u32 {
        /// Evaluate P2SH (BIP16) subscripts.
        const P2SH = 1 << 0;
        /// Enforce strict DER (BIP66) compliance.
        const DERSIG = 1 << 2;
        /// Enforce NULLDUMMY (BIP147).
        const NULLDUMMY = 1 << 4;
        /// Require that only a single stack element remains after evaluation.
        const CLEANSTACK = 1 << 8;
        /// Enable CHECKLOCKTIMEVERIFY (BIP65).
        const CHECKLOCKTIMEVERIFY = 1 << 9;
        /// Enable CHECKSEQUENCEVERIFY (BIP112).
        const CHECKSEQUENCEVERIFY = 1 << 10;
        /// Enable WITNESS (BIP141).
        const WITNESS = 1 << 11;
        /// Enable TAPROOT (BIPs 341 & 342).
        const TAPROOT = 1 << 17;

        /// Every flag accepted at the verification interface.
        const ALL = Self::P2SH.bits()
            | Self::DERSIG.bits()
            | Self::NULLDUMMY.bits()
            | Self::CHECKLOCKTIMEVERIFY.bits()
            | Self::CHECKSEQUENCEVERIFY.bits()
            | Self::WITNESS.bits()
            | Self::TAPROOT.bits();
    }
}

impl ScriptFlags {
    /// Parses a raw bitfield, returns `None` if any bit outside [`ScriptFlags::ALL`] is set.
    pub fn from_interface_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL.bits() != 0 {
            return None;
        }
        Some(Self::from_bits_retain(bits))
    }

    /// Returns `false` for flag sets that cannot be evaluated consistently.
    ///
    /// - CLEANSTACK without both P2SH and WITNESS: a switch CLEANSTACK->P2SH+CLEANSTACK
    ///   would be possible, making old P2SH spends invalid.
    /// - WITNESS without P2SH: P2SH-wrapped witness programs would be unspendable.
    ///
    /// https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/script/interpreter.cpp#L1985
    pub fn is_valid_combination(&self) -> bool {
        if self.contains(Self::CLEANSTACK) && !self.contains(Self::P2SH | Self::WITNESS) {
            return false;
        }
        if self.contains(Self::WITNESS) && !self.contains(Self::P2SH) {
            return false;
        }
        true
    }

    pub fn verify_p2sh(&self) -> bool {
        self.contains(Self::P2SH)
    }

    pub fn verify_witness(&self) -> bool {
        self.contains(Self::WITNESS)
    }

    pub fn verify_taproot(&self) -> bool {
        self.contains(Self::TAPROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(ScriptFlags::from_interface_bits(ScriptFlags::ALL.bits()).is_some());
        assert!(ScriptFlags::from_interface_bits(0).is_some());
        assert!(ScriptFlags::from_interface_bits(1 << 1).is_none());
        assert!(ScriptFlags::from_interface_bits(1 << 31).is_none());
        // Known to the interpreter, but not part of the interface set.
        assert!(ScriptFlags::from_interface_bits(ScriptFlags::CLEANSTACK.bits()).is_none());
    }

    #[test]
    fn flag_combinations() {
        assert!(ScriptFlags::empty().is_valid_combination());
        assert!(ScriptFlags::P2SH.is_valid_combination());
        assert!((ScriptFlags::P2SH | ScriptFlags::WITNESS).is_valid_combination());
        assert!(ScriptFlags::ALL.is_valid_combination());
        assert!(!ScriptFlags::WITNESS.is_valid_combination());
        assert!(!(ScriptFlags::WITNESS | ScriptFlags::TAPROOT).is_valid_combination());
        assert!(!(ScriptFlags::CLEANSTACK | ScriptFlags::P2SH).is_valid_combination());
        assert!((ScriptFlags::CLEANSTACK | ScriptFlags::P2SH | ScriptFlags::WITNESS)
            .is_valid_combination());
    }
}
