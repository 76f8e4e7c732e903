// resource-resolver-rs/src/arn.rs
// ARN parsing and name extraction

/// `arn:partition:service:region:account:resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArn<'a> {
    pub partition: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub account: &'a str,
    pub resource: &'a str,
}

impl<'a> ParsedArn<'a> {
    pub fn parse(arn: &'a str) -> Option<Self> {
        let mut parts = arn.trim().splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let parsed = Self {
            partition: parts.next()?,
            service: parts.next()?,
            region: parts.next()?,
            account: parts.next()?,
            resource: parts.next()?,
        };
        if parsed.partition.is_empty() || parsed.service.is_empty() || parsed.resource.is_empty() {
            return None;
        }
        Some(parsed)
    }

    /// Name of the resource as it would appear in configuration.
    pub fn resource_name(&self) -> &'a str {
        let resource = self.resource.strip_suffix(":*").unwrap_or(self.resource);

        match self.service {
            // arn:aws:s3:::bucket[/key]
            "s3" => resource.split('/').next().unwrap_or(resource),
            // function:name[:qualifier]
            "lambda" if resource.starts_with("function:") => {
                resource.split(':').nth(1).unwrap_or(resource)
            }
            // log-group:/path/name
            "logs" if resource.starts_with("log-group:") => {
                resource.strip_prefix("log-group:").unwrap_or(resource)
            }
            _ => last_segment(resource),
        }
    }
}

fn last_segment(resource: &str) -> &str {
    if resource.contains('/') {
        resource
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(resource)
    } else {
        resource.rsplit(':').next().unwrap_or(resource)
    }
}

/// Candidate resource name for an ARN. Identifiers that are not ARNs fall
/// back to their last path or colon segment.
pub fn extract_name(arn: &str) -> &str {
    match ParsedArn::parse(arn) {
        Some(parsed) => parsed.resource_name(),
        None => last_segment(arn.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let arn = ParsedArn::parse("arn:aws:iam::123456789012:role/service/Deployer").unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account, "123456789012");
        assert_eq!(arn.resource, "role/service/Deployer");

        assert!(ParsedArn::parse("not-an-arn").is_none());
        assert!(ParsedArn::parse("arn:aws:s3").is_none());
    }

    #[test]
    fn test_names_by_service() {
        assert_eq!(extract_name("arn:aws:s3:::bucket-a"), "bucket-a");
        assert_eq!(extract_name("arn:x:s3:::bucket-a"), "bucket-a");
        assert_eq!(extract_name("arn:aws:s3:::bucket-a/logs/2024"), "bucket-a");
        assert_eq!(extract_name("arn:aws:iam::1:role/path/RoleName"), "RoleName");
        assert_eq!(extract_name("arn:aws:rds:us-east-1:1:db:orders"), "orders");
        assert_eq!(
            extract_name("arn:aws:lambda:us-east-1:1:function:resize:live"),
            "resize"
        );
        assert_eq!(
            extract_name("arn:aws:logs:us-east-1:1:log-group:/app/api:*"),
            "/app/api"
        );
        assert_eq!(extract_name("arn:aws:sqs:us-east-1:1:jobs"), "jobs");
    }

    #[test]
    fn test_non_arn_fallback() {
        assert_eq!(extract_name("i-0abc"), "i-0abc");
        assert_eq!(extract_name("projects/p/buckets/b"), "b");
    }
}
