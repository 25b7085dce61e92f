use crate::prices::Cgid;

/// One indexed liquidity pool of a chain.
///
/// `initial_swap_fee` / `initial_admin_fee` are the deployment-time fees in
/// 1e-10 units; the live values are derived state, re-built by replaying
/// `NewSwapFee` / `NewAdminFee` events from `start_block`.
#[derive(Debug, Clone, Copy)]
pub struct Pool {
    pub kind: PoolKind,
    pub address: &'static str,
    pub start_block: u64,
    pub initial_swap_fee: u64,
    pub initial_admin_fee: u64,
    /// Pool tokens ordered by their on-chain index.
    pub tokens: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Nusd,
    Neth,
}

impl PoolKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            PoolKind::Nusd => "nusd",
            PoolKind::Neth => "neth",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "nusd" => Some(PoolKind::Nusd),
            "neth" => Some(PoolKind::Neth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub name: &'static str,
    pub id: u64,
    pub rpc_url: &'static str,
    pub bridge: &'static str,
    pub bridge_start_block: u64,
    /// Widest eth_getLogs window this chain's public RPCs tolerate.
    pub max_blocks: u64,
    pub pools: &'static [Pool],
    pub treasury: &'static str,
    /// What gas (and airdrops) are paid in on this chain.
    pub native_cgid: Cgid,
}

pub const CHAINS: &[Chain] = &[
    Chain {
        name: "ethereum",
        id: 1,
        rpc_url: "https://rpc.ankr.com/eth",
        bridge: "0x2796317b0ff8538f253012862c06787adfb8ceb6",
        bridge_start_block: 13_033_669,
        max_blocks: 1024,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0x1116898dda4015ed8ddefb84b6e8bc24528af2d8",
            start_block: 13_033_711,
            initial_swap_fee: 4_000_000,
            initial_admin_fee: 0,
            tokens: &[
                "0x6b175474e89094c44da98b954eedeac495271d0f",
                "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                "0xdac17f958d2ee523a2206206994597c13d831ec7",
            ],
        }],
        treasury: "0x67f60b0891ebd842ebe55e4ccca1098d7aac1a55",
        native_cgid: Cgid::Eth,
    },
    Chain {
        name: "bsc",
        id: 56,
        rpc_url: "https://bsc-dataseed.binance.org",
        bridge: "0xd123f70ae324d34a9e76b67a27bf77593ba8749f",
        bridge_start_block: 10_065_475,
        max_blocks: 1024,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0x28ec0b36f0819ecb5005cab836f4ed5a2eca4d13",
            start_block: 10_065_475,
            initial_swap_fee: 4_000_000,
            initial_admin_fee: 6_000_000_000,
            tokens: &[
                "0x23b891e5c62e0955ae2bd185990103928ab817b3",
                "0xe9e7cea3dedca5984780bafc599bd69add087d56",
                "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d",
                "0x55d398326f99059ff775485246999027b3197955",
            ],
        }],
        treasury: "0x0056580b0e8136c482b03760295f912279170d46",
        native_cgid: Cgid::Bnb,
    },
    Chain {
        name: "polygon",
        id: 137,
        rpc_url: "https://polygon-rpc.com",
        bridge: "0x8f5bbb2bb8c2ee94639e55d5f41de9b4839c1280",
        bridge_start_block: 18_026_806,
        max_blocks: 2048,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0x85fcd7dd0a1e1a9fcd5fd886ed522de8221c3ee5",
            start_block: 18_026_806,
            initial_swap_fee: 4_000_000,
            initial_admin_fee: 6_000_000_000,
            tokens: &[
                "0xb6c473756050de474286bed418b77aeac39b02af",
                "0x8f3cf7ad23cd3cadbd9735aff958023239c6a063",
                "0x2791bca1f2de4661ed88a30c99a7a9449aa84174",
                "0xc2132d05d31c914a87c6611c10748aeb04b58e8f",
            ],
        }],
        treasury: "0xbdd38b2eaae34c9fce187909e81e75cbec0dabe2",
        native_cgid: Cgid::Matic,
    },
    Chain {
        name: "avalanche",
        id: 43114,
        rpc_url: "https://api.avax.network/ext/bc/C/rpc",
        bridge: "0xc05e61d0e7a63d27546389b7ad62fdff5a91aace",
        bridge_start_block: 3_376_709,
        max_blocks: 5000,
        pools: &[
            Pool {
                kind: PoolKind::Nusd,
                address: "0xed2a7edd7413021d440b09d654f3b87712abab66",
                start_block: 3_376_709,
                initial_swap_fee: 4_000_000,
                initial_admin_fee: 6_000_000_000,
                tokens: &[
                    "0xcfc37a6ab183dd4aed08c204d1c2773c0b1bdf46",
                    "0xd586e7f844cea2f87f50152665bcbc2c279d8d70",
                    "0xa7d7079b0fead91f3e65f86e8915cb59c1a4c664",
                    "0xc7198437980c041c805a1edcba50c1ce5db95118",
                ],
            },
            Pool {
                kind: PoolKind::Neth,
                address: "0x77a7e60555bc18b4be44c181b2575eee46212d44",
                start_block: 6_619_002,
                initial_swap_fee: 4_000_000,
                initial_admin_fee: 6_000_000_000,
                tokens: &[
                    "0x19e1ae0ee35c0404f835521146206595d37981ae",
                    "0x53f7c5869a859f0aec3d334ee8b4cf01e3492f21",
                ],
            },
        ],
        treasury: "0xd7aa9ba6caac7b0436c91396f22ca5a7f31664fc",
        native_cgid: Cgid::Avax,
    },
    Chain {
        name: "arbitrum",
        id: 42161,
        rpc_url: "https://arb1.arbitrum.io/rpc",
        bridge: "0x6f4e8eba4d337f874ab57478acc2cb5bacdc19c9",
        bridge_start_block: 657_404,
        max_blocks: 5000,
        pools: &[
            Pool {
                kind: PoolKind::Nusd,
                address: "0x0db3fe3b770c95a0b99d1ed6f2627933466c0dd8",
                start_block: 657_404,
                initial_swap_fee: 4_000_000,
                initial_admin_fee: 0,
                tokens: &[
                    "0x2913e812cf0dcca30fb28e6cac3d2dcff4497688",
                    "0xff970a61a04b1ca14834a43f5de4533ebddb5cc8",
                    "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9",
                ],
            },
            Pool {
                kind: PoolKind::Neth,
                address: "0xa067668661c84476afcdc6fa5d758c4c01c34352",
                start_block: 810_322,
                initial_swap_fee: 0,
                initial_admin_fee: 0,
                tokens: &[
                    "0x3ea9b0ab55f34fb188824ee288ceaefc63cf908e",
                    "0x82af49447d8a07e3bd95bd0d56f35241523fbab1",
                ],
            },
        ],
        treasury: "0x940279ed9c8a2fd1a7f9e557a21a1c1c9b19d3d7",
        native_cgid: Cgid::Eth,
    },
    Chain {
        name: "fantom",
        id: 250,
        rpc_url: "https://rpc.ftm.tools",
        bridge: "0xaf41a65f786339e7911f4acdad6bd49426f2dc6b",
        bridge_start_block: 18_503_502,
        max_blocks: 5000,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0x2913e812cf0dcca30fb28e6cac3d2dcff4497688",
            start_block: 18_503_502,
            initial_swap_fee: 4_000_000,
            initial_admin_fee: 6_000_000_000,
            tokens: &[
                "0xed2a7edd7413021d440b09d654f3b87712abab66",
                "0x82f0b8b456c1a451378467398982d4834b6829c1",
                "0x04068da6c83afcfa0e13ba15a6696662335d5b75",
                "0x049d68029688eabf473097a2fc38ef61633a3c7a",
            ],
        }],
        treasury: "0x6948bd0fa54801e1ca30f6cbcca9fbba9c64cf9b",
        native_cgid: Cgid::Ftm,
    },
    Chain {
        name: "harmony",
        id: 1_666_600_000,
        rpc_url: "https://api.harmony.one",
        bridge: "0xaf41a65f786339e7911f4acdad6bd49426f2dc6b",
        bridge_start_block: 18_646_320,
        max_blocks: 1024,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0x3ea9b0ab55f34fb188824ee288ceaefc63cf908e",
            start_block: 18_646_320,
            initial_swap_fee: 0,
            initial_admin_fee: 0,
            tokens: &[
                "0xed2a7edd7413021d440b09d654f3b87712abab66",
                "0xef977d2f931c1978db5f6747666fa1eacb0d0339",
                "0x985458e523db3d53125813ed68c274899e9dfab4",
                "0x3c2b8be99c50593081eaa2a724f0b8285f5aba8f",
            ],
        }],
        treasury: "0x0172e7190bd5057b2cd1abf44ffab8a2a9b79386",
        native_cgid: Cgid::One,
    },
    Chain {
        name: "boba",
        id: 288,
        rpc_url: "https://mainnet.boba.network",
        bridge: "0x432036208d2717394d2614d6697c46df3ed69540",
        bridge_start_block: 14_100,
        max_blocks: 512,
        pools: &[
            Pool {
                kind: PoolKind::Nusd,
                address: "0x75ff037256b36f15919369ac58695550be72fead",
                start_block: 14_100,
                initial_swap_fee: 0,
                initial_admin_fee: 0,
                tokens: &[
                    "0x6b4712ae9797c199edd44f897ca09bc57628a1cf",
                    "0x66a2a913e447d6b4bf33efbec43aaef87890fbbc",
                ],
            },
            Pool {
                kind: PoolKind::Neth,
                address: "0x753bb855c8fe814233d26bb23af61cb3d2022be5",
                start_block: 14_100,
                initial_swap_fee: 0,
                initial_admin_fee: 0,
                tokens: &[
                    "0x96419929d7949d6a801a6909c145c8eef6a40431",
                    "0xd203de32170130082896b4111edf825a4774c18e",
                ],
            },
        ],
        treasury: "0x6991ef331a8ff1835267d12c4a6a4b75cea8e9c4",
        native_cgid: Cgid::Eth,
    },
    Chain {
        name: "optimism",
        id: 10,
        rpc_url: "https://mainnet.optimism.io",
        bridge: "0xaf41a65f786339e7911f4acdad6bd49426f2dc6b",
        bridge_start_block: 30_819,
        max_blocks: 5000,
        pools: &[Pool {
            kind: PoolKind::Neth,
            address: "0xe27bff97ce92c3e1ff7aa9f86781fdd6d48f5ee9",
            start_block: 30_819,
            initial_swap_fee: 0,
            initial_admin_fee: 0,
            tokens: &[
                "0x809dc529f07651bd43a172e8db6f4a7a0d771036",
                "0x121ab82b49b2bc4c7901ca46b8277962b4350204",
            ],
        }],
        treasury: "0x2431cbdc0792f5485c4cb0a9bef06c4f21541d52",
        native_cgid: Cgid::Eth,
    },
    Chain {
        name: "moonriver",
        id: 1285,
        rpc_url: "https://rpc.api.moonriver.moonbeam.network",
        bridge: "0xaed5b25be1c3163c907a471082640450f928ddfe",
        bridge_start_block: 890_949,
        max_blocks: 1024,
        pools: &[],
        treasury: "0x4bb87bf7e539b83afec92e85632ea79a2a40b27b",
        native_cgid: Cgid::Movr,
    },
    Chain {
        name: "aurora",
        id: 1_313_161_554,
        rpc_url: "https://mainnet.aurora.dev",
        bridge: "0xaed5b25be1c3163c907a471082640450f928ddfe",
        bridge_start_block: 56_092_179,
        max_blocks: 1024,
        pools: &[Pool {
            kind: PoolKind::Nusd,
            address: "0xcef6c2e20898c2604886b888552ca6ccf66933b0",
            start_block: 56_092_179,
            initial_swap_fee: 4_000_000,
            initial_admin_fee: 6_000_000_000,
            tokens: &[
                "0x07379565cd8b0cae7c60dc78e7f601b34af2a21c",
                "0xb12bfca5a55806aaf64e99521918a4bf0fc40802",
                "0x4988a896b1227218e4a686fde5eabdcabd91571f",
            ],
        }],
        treasury: "0xbb227fcf345f60ed29ff7b9c23e98e5f27df378e",
        native_cgid: Cgid::Eth,
    },
    Chain {
        name: "moonbeam",
        id: 1284,
        rpc_url: "https://rpc.api.moonbeam.network",
        bridge: "0x84a420459cd31c3c34583f67e0f0fb191067d32f",
        bridge_start_block: 173_355,
        max_blocks: 1024,
        pools: &[],
        treasury: "0x1e1f8c61e6382e0b9d999f2aa8d617a6ba05b674",
        native_cgid: Cgid::Glmr,
    },
];

pub fn by_name(name: &str) -> Option<&'static Chain> {
    CHAINS.iter().find(|c| c.name == name)
}

pub fn by_id(id: u64) -> Option<&'static Chain> {
    CHAINS.iter().find(|c| c.id == id)
}

pub fn names() -> Vec<&'static str> {
    CHAINS.iter().map(|c| c.name).collect()
}

impl Chain {
    pub fn pool(&self, kind: PoolKind) -> Option<&'static Pool> {
        self.pools.iter().find(|p| p.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_has_unique_names_and_ids() {
        let mut names: Vec<_> = CHAINS.iter().map(|c| c.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CHAINS.len());

        let mut ids: Vec<_> = CHAINS.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CHAINS.len());
    }

    #[test]
    fn addresses_are_lowercase_hex() {
        for chain in CHAINS {
            for addr in std::iter::once(chain.bridge)
                .chain(std::iter::once(chain.treasury))
                .chain(chain.pools.iter().map(|p| p.address))
                .chain(chain.pools.iter().flat_map(|p| p.tokens.iter().copied()))
            {
                assert!(addr.starts_with("0x"), "{addr} missing 0x prefix");
                assert_eq!(addr.len(), 42, "{addr} wrong length");
                assert_eq!(addr, addr.to_lowercase(), "{addr} not lowercased");
            }
        }
    }

    #[test]
    fn lookups_resolve_both_ways() {
        let polygon = by_name("polygon").expect("polygon in roster");
        assert_eq!(polygon.id, 137);
        assert_eq!(by_id(137).expect("id 137").name, "polygon");
        assert!(by_name("dogechain").is_none());
    }
}
