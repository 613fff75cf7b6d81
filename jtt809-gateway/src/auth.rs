//! 登录鉴权
//! 基于静态账号表校验下级平台登录，校验顺序：账号存在、来源 IP、接入码、密码

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::Rng;

use crate::network::packet::{LoginRequest, LoginResponse, VerifyResult};

/// 允许接入的下级平台账号
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Account {
    pub user_id: u32,
    /// 长度不超过 8
    pub password: String,
    pub gnss_center_id: u32,
    /// 允许的来源 IP，"*" 表示不限
    #[serde(default = "default_allow_ips")]
    pub allow_ips: Vec<String>,
}

fn default_allow_ips() -> Vec<String> {
    vec!["*".to_string()]
}

fn is_ip_allowed(ip: &str, allow_ips: &[String]) -> bool {
    if allow_ips.is_empty() {
        return true;
    }
    allow_ips
        .iter()
        .any(|allow| allow == "*" || (!ip.is_empty() && ip == allow))
}

/// 账号表，运行期只增改
pub struct Authenticator {
    accounts: RwLock<HashMap<u32, Account>>,
}

impl Authenticator {
    pub fn new(accounts: Vec<Account>) -> Self {
        let map = accounts
            .into_iter()
            .map(|acc| (acc.user_id, acc))
            .collect::<HashMap<_, _>>();
        Self {
            accounts: RwLock::new(map),
        }
    }

    /// 校验登录请求，返回账号信息与登录应答
    /// 请求头中的接入码须与账号登记一致
    pub fn authenticate(
        &self,
        req: &LoginRequest,
        gnss_center_id: u32,
        client_ip: &str,
    ) -> (Option<Account>, LoginResponse) {
        let accounts = self.accounts.read();
        let acc = match accounts.get(&req.user_id) {
            Some(acc) => acc.clone(),
            None => {
                return (
                    None,
                    LoginResponse {
                        result: VerifyResult::Unregistered,
                        verify_code: 0,
                    },
                )
            }
        };
        if !is_ip_allowed(client_ip, &acc.allow_ips) {
            return (
                Some(acc),
                LoginResponse {
                    result: VerifyResult::IpNotAllowed,
                    verify_code: 0,
                },
            );
        }
        if gnss_center_id != acc.gnss_center_id {
            return (
                Some(acc),
                LoginResponse {
                    result: VerifyResult::GnssCenterMismatch,
                    verify_code: 0,
                },
            );
        }
        if req.password != acc.password {
            return (
                Some(acc),
                LoginResponse {
                    result: VerifyResult::BadPassword,
                    verify_code: 0,
                },
            );
        }
        // 登录成功，签发非零校验码，从链路登录时回带
        let mut rng = rand::thread_rng();
        let verify_code = loop {
            let code: u32 = rng.gen();
            if code != 0 {
                break code;
            }
        };
        (
            Some(acc),
            LoginResponse {
                result: VerifyResult::Ok,
                verify_code,
            },
        )
    }

    pub fn lookup(&self, user_id: u32) -> Option<Account> {
        self.accounts.read().get(&user_id).cloned()
    }

    /// 批量新增或更新账号，返回被覆盖的用户 ID
    pub fn add_accounts(&self, accounts: Vec<Account>) -> Vec<u32> {
        let mut map = self.accounts.write();
        let mut replaced = Vec::new();
        for acc in accounts {
            if map.contains_key(&acc.user_id) {
                replaced.push(acc.user_id);
            }
            map.insert(acc.user_id, acc);
        }
        replaced
    }

    /// 新增或更新账号，返回是否覆盖了已有账号
    pub fn add_account(&self, account: Account) -> bool {
        !self.add_accounts(vec![account]).is_empty()
    }

    /// 删除账号，返回账号是否存在
    pub fn remove_account(&self, user_id: u32) -> bool {
        self.accounts.write().remove(&user_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            user_id: 10001,
            password: "pass809".into(),
            gnss_center_id: 20190708,
            allow_ips: vec!["*".into()],
        }
    }

    fn login_req(user_id: u32, password: &str) -> LoginRequest {
        LoginRequest {
            user_id,
            password: password.into(),
            down_link_ip: "127.0.0.1".into(),
            down_link_port: 9000,
            protocol_version: [1, 0, 0],
        }
    }

    #[test]
    fn unknown_user_is_unregistered() {
        let auth = Authenticator::new(vec![account()]);
        let (acc, resp) = auth.authenticate(&login_req(99999, "x"), 20190708, "1.2.3.4");
        assert!(acc.is_none());
        assert_eq!(resp.result, VerifyResult::Unregistered);
    }

    #[test]
    fn ip_not_in_allow_list_is_forbidden() {
        let mut acc = account();
        acc.allow_ips = vec!["10.0.0.1".into()];
        let auth = Authenticator::new(vec![acc]);
        let (_, resp) = auth.authenticate(&login_req(10001, "pass809"), 20190708, "10.0.0.2");
        assert_eq!(resp.result, VerifyResult::IpNotAllowed);

        let (_, resp) = auth.authenticate(&login_req(10001, "pass809"), 20190708, "10.0.0.1");
        assert_eq!(resp.result, VerifyResult::Ok);
    }

    #[test]
    fn gnss_center_mismatch() {
        let auth = Authenticator::new(vec![account()]);
        let (_, resp) = auth.authenticate(&login_req(10001, "pass809"), 1, "1.2.3.4");
        assert_eq!(resp.result, VerifyResult::GnssCenterMismatch);
    }

    #[test]
    fn bad_password() {
        let auth = Authenticator::new(vec![account()]);
        let (_, resp) = auth.authenticate(&login_req(10001, "wrong"), 20190708, "1.2.3.4");
        assert_eq!(resp.result, VerifyResult::BadPassword);
    }

    #[test]
    fn success_issues_nonzero_verify_code() {
        let auth = Authenticator::new(vec![account()]);
        let (acc, resp) = auth.authenticate(&login_req(10001, "pass809"), 20190708, "1.2.3.4");
        assert!(acc.is_some());
        assert_eq!(resp.result, VerifyResult::Ok);
        assert_ne!(resp.verify_code, 0);
    }

    #[test]
    fn account_management() {
        let auth = Authenticator::new(vec![account()]);
        assert!(auth.lookup(10001).is_some());
        // 覆盖已有账号
        assert!(auth.add_account(account()));
        let mut newer = account();
        newer.user_id = 10002;
        assert!(!auth.add_account(newer));
        assert!(auth.remove_account(10002));
        assert!(!auth.remove_account(10002));
    }
}
