//! Read batching.
//!
//! Plans the minimum set of Modbus read requests for a list of register
//! configs: registers of the same type are sorted by address and merged into
//! one request while they stay within reach of each other and the combined
//! span fits a single PDU. A one-register hole between neighbours still
//! merges; the extra word is read and ignored, which is cheaper than a
//! second round-trip.

use ironview_storage::{RegisterConfig, RegisterKind};

/// Modbus function 0x03/0x04 cap on registers per request.
pub const MAX_BATCH_REGISTERS: u16 = 125;

/// One planned read request covering a contiguous address span.
#[derive(Debug, Clone)]
pub struct ReadBatch {
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
    /// Configs served by this request, in address order.
    pub members: Vec<RegisterConfig>,
}

impl ReadBatch {
    fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    /// Slice a member's words out of the batch response.
    pub fn slice<'a>(&self, response: &'a [u16], member: &RegisterConfig) -> Option<&'a [u16]> {
        let offset = member.address.checked_sub(self.start)? as usize;
        let end = offset + member.count as usize;
        response.get(offset..end)
    }
}

/// Plan batches for a set of register configs.
///
/// Every config lands in exactly one batch; no batch mixes register types or
/// exceeds [`MAX_BATCH_REGISTERS`].
pub fn plan_batches(configs: &[RegisterConfig]) -> Vec<ReadBatch> {
    const KIND_ORDER: [RegisterKind; 4] = [
        RegisterKind::Holding,
        RegisterKind::Input,
        RegisterKind::Coil,
        RegisterKind::Discrete,
    ];

    let mut batches = Vec::new();
    for kind in KIND_ORDER {
        let mut group: Vec<RegisterConfig> = configs
            .iter()
            .filter(|c| c.register_type == kind)
            .cloned()
            .collect();
        if group.is_empty() {
            continue;
        }
        group.sort_by_key(|c| c.address);

        let mut current: Option<ReadBatch> = None;
        for config in group {
            let config_end = config.address as u32 + config.count as u32;

            if let Some(batch) = current.as_mut() {
                let merged_end = batch.end().max(config_end);
                let within_reach = (config.address as u32) <= batch.end() + 1;
                let fits = merged_end - batch.start as u32 <= MAX_BATCH_REGISTERS as u32;
                if within_reach && fits {
                    batch.count = (merged_end - batch.start as u32) as u16;
                    batch.members.push(config);
                    continue;
                }
                batches.push(current.take().expect("batch present"));
            }

            current = Some(ReadBatch {
                kind,
                start: config.address,
                count: config.count,
                members: vec![config],
            });
        }
        if let Some(batch) = current {
            batches.push(batch);
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironview_storage::DataKind;

    fn config(kind: RegisterKind, address: u16, count: u16) -> RegisterConfig {
        RegisterConfig {
            id: address as i64,
            device_id: 1,
            name: format!("reg_{address}"),
            address,
            count,
            register_type: kind,
            data_type: if count == 2 { DataKind::Float32 } else { DataKind::Uint16 },
            scale_factor: 1.0,
            offset: 0.0,
            unit: None,
            interval_ms: None,
            active: true,
        }
    }

    fn member_addresses(batch: &ReadBatch) -> Vec<u16> {
        batch.members.iter().map(|m| m.address).collect()
    }

    #[test]
    fn test_reference_plan() {
        let configs = vec![
            config(RegisterKind::Holding, 100, 1),
            config(RegisterKind::Holding, 101, 2),
            config(RegisterKind::Holding, 110, 1),
            config(RegisterKind::Input, 200, 1),
            config(RegisterKind::Holding, 104, 1),
        ];
        let batches = plan_batches(&configs);
        assert_eq!(batches.len(), 3);

        assert_eq!(batches[0].kind, RegisterKind::Holding);
        assert_eq!((batches[0].start, batches[0].count), (100, 5));
        assert_eq!(member_addresses(&batches[0]), vec![100, 101, 104]);

        assert_eq!((batches[1].start, batches[1].count), (110, 1));
        assert_eq!(member_addresses(&batches[1]), vec![110]);

        assert_eq!(batches[2].kind, RegisterKind::Input);
        assert_eq!((batches[2].start, batches[2].count), (200, 1));
    }

    #[test]
    fn test_no_cross_type_batching() {
        let configs = vec![
            config(RegisterKind::Holding, 0, 1),
            config(RegisterKind::Input, 1, 1),
            config(RegisterKind::Coil, 2, 1),
        ];
        let batches = plan_batches(&configs);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_pdu_cap() {
        // 126 contiguous registers split into two requests.
        let configs: Vec<_> = (0..126)
            .map(|a| config(RegisterKind::Holding, a, 1))
            .collect();
        let batches = plan_batches(&configs);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].count, 125);
        assert_eq!(batches[1].start, 125);
        assert!(batches.iter().all(|b| b.count <= MAX_BATCH_REGISTERS));
    }

    #[test]
    fn test_every_config_in_exactly_one_batch() {
        let configs = vec![
            config(RegisterKind::Holding, 5, 1),
            config(RegisterKind::Holding, 300, 2),
            config(RegisterKind::Holding, 6, 2),
            config(RegisterKind::Input, 5, 1),
            config(RegisterKind::Holding, 1000, 1),
        ];
        let batches = plan_batches(&configs);

        let mut seen: Vec<(RegisterKind, u16, u16)> = batches
            .iter()
            .flat_map(|b| b.members.iter().map(|m| (m.register_type, m.address, m.count)))
            .collect();
        seen.sort_by_key(|(_, a, _)| *a);

        let mut expected: Vec<(RegisterKind, u16, u16)> = configs
            .iter()
            .map(|c| (c.register_type, c.address, c.count))
            .collect();
        expected.sort_by_key(|(_, a, _)| *a);

        assert_eq!(seen.len(), expected.len());
        for triple in expected {
            assert!(seen.contains(&triple));
        }
    }

    #[test]
    fn test_overlapping_members_merge() {
        let configs = vec![
            config(RegisterKind::Holding, 10, 2),
            config(RegisterKind::Holding, 11, 2),
        ];
        let batches = plan_batches(&configs);
        assert_eq!(batches.len(), 1);
        assert_eq!((batches[0].start, batches[0].count), (10, 3));
    }

    #[test]
    fn test_slice() {
        let configs = vec![
            config(RegisterKind::Holding, 100, 1),
            config(RegisterKind::Holding, 101, 2),
        ];
        let batches = plan_batches(&configs);
        let batch = &batches[0];

        let response = vec![7u16, 40000, 1];
        assert_eq!(batch.slice(&response, &batch.members[0]), Some(&[7u16][..]));
        assert_eq!(
            batch.slice(&response, &batch.members[1]),
            Some(&[40000u16, 1][..])
        );

        // Truncated response yields no slice instead of panicking.
        let short = vec![7u16];
        assert_eq!(batch.slice(&short, &batch.members[1]), None);
    }
}
