//! # 可执行网核心定义（带颜色令牌的 Place/Transition Net）
//!
//! 设库所集合 `P`、迁移集合 `T` 与令牌颜色集合 `C`。弧带有颜色权重
//! `W: C → ℕ⁺`，输入弧为 `place → transition`，输出弧为 `transition → place`。
//!
//! * [`Net`] 是可编辑模型：组件以字符串 id 寻址，按插入顺序保存，增删时检查
//!   引用完整性（见 [`NetError`]）。
//! * [`ExecutableNet`] 是运行时模型：由扁平网编译得到强类型下标，提供可发生集
//!   计算与单步发生。
//!
//! ## 示例
//!
//! ```rust
//! use xschema::net::*;
//!
//! let mut net = Net::new("chain");
//! net.add_token(Token::default()).unwrap();
//! net.add_place(Place::new("P0").with_tokens(DEFAULT_TOKEN, 1)).unwrap();
//! net.add_place(Place::new("P1")).unwrap();
//! net.add_transition(Transition::immediate("T0")).unwrap();
//! net.add_arc(Arc::inbound("P0", "T0", weights(DEFAULT_TOKEN, 1))).unwrap();
//! net.add_arc(Arc::outbound("T0", "P1", weights(DEFAULT_TOKEN, 1))).unwrap();
//!
//! let exec = ExecutableNet::compile(&net).unwrap();
//! let marking = exec.initial_marking();
//! let t0 = exec.transition_id("T0").unwrap();
//! assert_eq!(exec.enabled_transitions(&marking), vec![t0]);
//! let next = exec.fire_transition(&marking, t0).unwrap();
//! assert_eq!(next.total(exec.place_id("P1").unwrap()), 1);
//! ```

pub mod core;
pub mod executable;
pub mod ids;
pub mod index_vec;
pub mod io;
pub mod structure;

pub use self::core::{Component, Net, NetError};
pub use executable::{ExecPlace, ExecTransition, ExecutableNet, FireError, Marking};
pub use ids::{ColorId, PlaceId, TransitionId};
pub use index_vec::{Idx, IndexVec};
pub use structure::{
    Arc, ArcDirection, ComponentKind, DEFAULT_TOKEN, InterfaceFlags, InterfaceStatus, Place,
    PlaceStatus, Rgb, Token, TokenCounts, Transition, TransitionKind, Weight, arc_id, weights,
};
