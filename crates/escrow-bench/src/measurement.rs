/// Operations whose gas cost is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Sum of per-payee `deposit` estimates on the mapping escrow.
    MappingDeposit,
    /// Gas used by one executed mapping `bulkDeposit`.
    MappingBulkDeposit,
    /// Gas used by one executed Merkle `bulkDeposit`.
    MerkleBulkDeposit,
    /// Sum of per-payee `withdraw` estimates on the mapping escrow.
    MappingWithdraw,
    /// Sum of per-payee proof-carrying `withdraw` estimates on the Merkle escrow.
    MerkleWithdraw,
}

impl Operation {
    /// Column order of the output table (after `n`).
    pub const ALL: [Operation; 5] = [
        Operation::MappingDeposit,
        Operation::MappingBulkDeposit,
        Operation::MerkleBulkDeposit,
        Operation::MappingWithdraw,
        Operation::MerkleWithdraw,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::MappingDeposit => "Mapping.deposit",
            Self::MappingBulkDeposit => "Mapping.bulkDeposit",
            Self::MerkleBulkDeposit => "Merkle.bulkDeposit",
            Self::MappingWithdraw => "Mapping.withdraw",
            Self::MerkleWithdraw => "Merkle.withdraw",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasMeasurement {
    pub operation: Operation,
    pub population: usize,
    pub cost: u64,
}

/// All measurements of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub n: usize,
    pub mapping_deposit: u64,
    pub mapping_bulk_deposit: u64,
    pub merkle_bulk_deposit: u64,
    pub mapping_withdraw: u64,
    pub merkle_withdraw: u64,
}

impl Row {
    /// Header matching [`Row::cells`].
    pub fn header() -> Vec<&'static str> {
        std::iter::once("n")
            .chain(Operation::ALL.iter().map(Operation::column))
            .collect()
    }

    pub fn cost(&self, operation: Operation) -> u64 {
        match operation {
            Operation::MappingDeposit => self.mapping_deposit,
            Operation::MappingBulkDeposit => self.mapping_bulk_deposit,
            Operation::MerkleBulkDeposit => self.merkle_bulk_deposit,
            Operation::MappingWithdraw => self.mapping_withdraw,
            Operation::MerkleWithdraw => self.merkle_withdraw,
        }
    }

    pub fn measurements(&self) -> Vec<GasMeasurement> {
        Operation::ALL
            .iter()
            .map(|&operation| GasMeasurement {
                operation,
                population: self.n,
                cost: self.cost(operation),
            })
            .collect()
    }

    /// Decimal cells in header order.
    pub fn cells(&self) -> Vec<String> {
        std::iter::once(self.n.to_string())
            .chain(Operation::ALL.iter().map(|op| self.cost(*op).to_string()))
            .collect()
    }

    /// Merkle bulk deposit gas relative to `n` individual mapping deposits.
    /// Returns `None` when no deposit cost was measured.
    pub fn batching_ratio(&self) -> Option<f64> {
        (self.mapping_deposit > 0)
            .then(|| self.merkle_bulk_deposit as f64 / self.mapping_deposit as f64)
    }
}
